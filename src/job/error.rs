//! Job error taxonomy.

use thiserror::Error;

/// Everything that can stop a submission or end a job in `error`.
#[derive(Error, Debug)]
pub enum JobError {
    /// The engine could not provide a model on any usable device.
    #[error("Failed to load model '{model}' on {device}: {reason}")]
    ModelLoad {
        model: String,
        device: String,
        reason: String,
    },
    /// A job is already loading or processing.
    #[error("A transcription job is already running")]
    JobInProgress,
    /// The referenced input is not in the upload area.
    #[error("File {0} was not found")]
    InputNotFound(String),
    /// The engine's transcribe call failed (or panicked).
    #[error("Transcription failed: {0}")]
    EngineExecution(String),
    /// The transcript could not be written to the output folder.
    #[error("Failed to write result for {file}: {source}")]
    ArtifactWrite {
        file: String,
        #[source]
        source: std::io::Error,
    },
    /// The transcript was written but the input could not be moved to the
    /// processed folder; the transcript is withdrawn again.
    #[error("Failed to move {file} to the processed folder: {source}")]
    ArchiveInput {
        file: String,
        #[source]
        source: std::io::Error,
    },
    /// Malformed submission (bad file name, unknown option).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
