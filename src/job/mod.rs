//! Background transcription jobs and their progress telemetry.

mod dispatcher;
mod error;
mod extractor;
mod monitor;
mod runner;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{JobDispatcher, ProgressReader, SubmittedJob};
pub use error::JobError;
pub use extractor::{parse_percent, CaptureScope, ProgressCapture, ProgressSink};
pub use runner::{JobRequest, JobSettings, DEFAULT_LANGUAGE, DEFAULT_MODEL};
pub use state::{JobStatus, ProgressSnapshot};
