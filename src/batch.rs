//! One-shot transcription of every pending file.

use crate::files::list_pending;
use crate::job::{JobDispatcher, JobRequest, JobStatus};
use crate::paths::WorkDirs;
use crate::transcription::Device;
use log::{error, info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub model: String,
    pub language: String,
    pub device: String,
    /// What `auto` means, detected once at start-up.
    pub auto_device: Device,
    pub compute_type: String,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub transcribed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Transcribe pending files one after another. A failed file is logged and
/// skipped; only bad options or an unreadable upload folder stop the run.
pub async fn run_batch(
    dispatcher: &JobDispatcher,
    dirs: &WorkDirs,
    options: &BatchOptions,
    poll: Duration,
) -> Result<BatchSummary, String> {
    let started = Instant::now();
    let pending = list_pending(dirs)?;
    let mut summary = BatchSummary::default();
    if pending.is_empty() {
        info!("[batch] no audio files in {}", dirs.upload.display());
        return Ok(summary);
    }
    info!("[batch] {} audio file(s) found", pending.len());

    let reader = dispatcher.reader();
    for (index, file) in pending.iter().enumerate() {
        info!("[batch] ({}/{}) {}", index + 1, pending.len(), file);
        let request = JobRequest::from_options(
            file,
            Some(&options.model),
            Some(&options.language),
            Some(&options.device),
            options.auto_device,
            Some(&options.compute_type),
            false,
        )
        .map_err(|e| e.to_string())?;

        let job = match dispatcher.submit(request) {
            Ok(job) => job,
            Err(e) => {
                warn!("[batch] {} skipped: {}", file, e);
                summary.failed.push((file.clone(), e.to_string()));
                continue;
            }
        };
        let done = reader.wait_for(&job, poll).await;
        if done.status == JobStatus::Completed && done.file == *file {
            info!("[batch] {}", done.message);
            summary.transcribed.push(file.clone());
        } else {
            error!("[batch] {} failed: {}", file, done.message);
            summary.failed.push((file.clone(), done.message));
        }
    }

    info!(
        "[batch] finished in {:.2}s: {} transcribed, {} failed",
        started.elapsed().as_secs_f64(),
        summary.transcribed.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::testing::{Outcome, ScriptedEngine, ScriptedRun};
    use crate::job::JobSettings;
    use std::sync::Arc;

    fn options(model: &str) -> BatchOptions {
        BatchOptions {
            model: model.to_string(),
            language: "ja".to_string(),
            device: "cpu".to_string(),
            auto_device: Device::Cpu,
            compute_type: "float32".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_file_is_skipped_and_the_run_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::under(tmp.path());
        dirs.ensure().unwrap();
        for name in ["a.mp3", "b.wav", "c.flac", "readme.txt"] {
            std::fs::write(dirs.upload.join(name), b"x").unwrap();
        }
        let engine = Arc::new(ScriptedEngine::new(vec![
            ScriptedRun::quick("first"),
            ScriptedRun::progress(&[40], Duration::from_millis(5), Outcome::Fail("decoder crashed".into())),
            ScriptedRun::quick("third"),
        ]));
        let settings = JobSettings {
            tick: Duration::from_millis(15),
            grace: Duration::from_millis(200),
        };
        let dispatcher = JobDispatcher::new(engine.clone(), dirs.clone(), settings);

        let summary = run_batch(&dispatcher, &dirs, &options("turbo"), Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(summary.transcribed, vec!["a.mp3", "c.flac"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "b.wav");
        assert!(summary.failed[0].1.contains("decoder crashed"));
        assert!(dirs.upload.join("b.wav").exists());
        assert!(dirs.upload.join("readme.txt").exists());
        assert_eq!(std::fs::read_to_string(dirs.output.join("c.txt")).unwrap(), "third");
        assert_eq!(engine.load_calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_model_stops_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::under(tmp.path());
        dirs.ensure().unwrap();
        std::fs::write(dirs.upload.join("a.mp3"), b"x").unwrap();
        let dispatcher = JobDispatcher::new(Arc::new(ScriptedEngine::new(vec![])), dirs.clone(), JobSettings::default());

        let err = run_batch(&dispatcher, &dirs, &options("huge"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.contains("Unknown model"));
    }
}
