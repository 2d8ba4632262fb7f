mod batch;
mod config;
mod files;
pub mod job;
mod paths;
mod server;
pub mod transcription;

use batch::{run_batch, BatchOptions};
use clap::Parser;
use config::{Cli, Command};
use job::{JobDispatcher, JobSettings};
use log::{error, info};
use server::AppState;
use std::sync::Arc;
use std::time::Duration;
use transcription::{Device, TranscriptionEngine, WhisperCliEngine};

const BATCH_POLL: Duration = Duration::from_millis(500);

fn init_logger(level: log::LevelFilter) -> Result<std::path::PathBuf, fern::InitError> {
    let log_dir = paths::log_dir_path();
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = paths::log_file_path();

    let format = |out: fern::FormatCallback<'_>, message: &std::fmt::Arguments<'_>, record: &log::Record| {
        out.finish(format_args!(
            "[{}][{}][{}][{:?}] {}",
            chrono::Local::now().format("%Y-%m-%d"),
            chrono::Local::now().format("%H:%M:%S"),
            record.target(),
            record.level(),
            message
        ))
    };

    fern::Dispatch::new()
        .format(format)
        .level(level)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_file)?)
        .apply()?;

    Ok(log_file)
}

fn start(cli: Cli) -> Result<(), String> {
    let dirs = cli.work_dirs();
    dirs.ensure()?;
    let models_dir = cli.models_dir();
    std::fs::create_dir_all(&models_dir)
        .map_err(|e| format!("Failed to create {}: {}", models_dir.display(), e))?;
    info!(
        "[whisper-transcriber] base={} models={} whisper={}",
        cli.base_dir.display(),
        models_dir.display(),
        cli.whisper_bin
    );

    let engine = Arc::new(WhisperCliEngine::new(cli.whisper_bin.clone(), models_dir.clone()));
    let auto_device = Device::detect();
    info!("[whisper-transcriber] engine={} auto device={}", engine.id(), auto_device);
    let dispatcher = JobDispatcher::new(engine, dirs.clone(), JobSettings::default());
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(async move {
        match cli.command() {
            Command::Serve { host, port } => {
                let state = AppState::new(dispatcher, dirs, models_dir, auto_device);
                server::serve(state, &format!("{}:{}", host, port)).await
            }
            Command::Batch {
                model,
                language,
                device,
                compute_type,
            } => {
                let options = BatchOptions {
                    model,
                    language,
                    device,
                    auto_device,
                    compute_type,
                };
                let summary = run_batch(&dispatcher, &dirs, &options, BATCH_POLL).await?;
                if summary.failed.is_empty() {
                    Ok(())
                } else {
                    Err(format!("{} file(s) failed", summary.failed.len()))
                }
            }
        }
    })
}

pub fn run() {
    let cli = Cli::parse();
    match init_logger(cli.log_level) {
        Ok(path) => info!("[whisper-transcriber] logging to {}", path.display()),
        Err(e) => eprintln!("Failed to initialise file logging: {}", e),
    }
    if let Err(e) = start(cli) {
        error!("[whisper-transcriber] {}", e);
        std::process::exit(1);
    }
}
