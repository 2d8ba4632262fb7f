//! Command line configuration.

use crate::paths::{default_models_dir, WorkDirs};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "whisper-transcriber", about = "Whisper transcription service with live progress")]
pub struct Cli {
    /// Folder holding audiofile/, output/ and processed/
    #[arg(long, global = true, default_value = ".")]
    pub base_dir: PathBuf,

    /// Where ggml model files are cached
    #[arg(long, global = true)]
    pub models_dir: Option<PathBuf>,

    /// whisper.cpp command line binary
    #[arg(long, global = true, env = "WHISPER_BIN", default_value = "whisper-cli")]
    pub whisper_bin: String,

    #[arg(long, global = true, env = "WHISPER_TRANSCRIBER_LOG", default_value = "info")]
    pub log_level: log::LevelFilter,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand, PartialEq)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Transcribe every pending file once, in order
    Batch {
        #[arg(long, default_value = "turbo")]
        model: String,
        #[arg(long, default_value = "ja")]
        language: String,
        /// cpu, cuda or auto
        #[arg(long, default_value = "auto")]
        device: String,
        /// float32 or float16
        #[arg(long, default_value = "float32")]
        compute_type: String,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            host: "0.0.0.0".to_string(),
            port: 8080,
        })
    }

    pub fn work_dirs(&self) -> WorkDirs {
        WorkDirs::under(&self.base_dir)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(default_models_dir)
    }
}
