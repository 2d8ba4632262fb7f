//! Transcription engines.

mod backend;
mod model_download;
mod whisper_cli;

pub use backend::{ComputeType, Device, LoadedModel, TranscriptionEngine};
pub use model_download::{canonical_model_name, list_installed_model_names, MODEL_SOURCES};
pub use whisper_cli::WhisperCliEngine;
