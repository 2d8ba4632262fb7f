//! Path utilities for the working folders, models and logs.

use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "whisper-transcriber";

/// The three folders a job moves files through.
#[derive(Debug, Clone)]
pub struct WorkDirs {
    /// Uploaded audio waiting to be transcribed.
    pub upload: PathBuf,
    /// Transcript artifacts.
    pub output: PathBuf,
    /// Inputs of successfully transcribed jobs.
    pub processed: PathBuf,
}

impl WorkDirs {
    pub fn under(base: &Path) -> Self {
        Self {
            upload: base.join("audiofile"),
            output: base.join("output"),
            processed: base.join("processed"),
        }
    }

    /// Ensure all working folders exist.
    pub fn ensure(&self) -> Result<(), String> {
        for dir in [&self.upload, &self.output, &self.processed] {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        }
        Ok(())
    }
}

/// Transcript file name for an input: `meeting.mp3` -> `meeting.txt`.
pub fn artifact_name(input: &str) -> String {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(input);
    format!("{}.txt", stem)
}

/// Per-user data directory (e.g. ~/.local/share/whisper-transcriber), or ./ if unknown.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Log directory. Resolved without any configuration so logging can start first.
pub fn log_dir_path() -> PathBuf {
    app_data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    log_dir_path().join(format!("{}.log", APP_DIR_NAME))
}
