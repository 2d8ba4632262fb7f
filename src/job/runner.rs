//! Runs one transcription job from model loading to the final status.

use super::error::JobError;
use super::extractor::CaptureScope;
use super::monitor::{spawn_monitor, MonitorSlot};
use super::state::{JobStatus, JobTicket, ProgressState};
use crate::paths::{artifact_name, WorkDirs};
use crate::transcription::{canonical_model_name, ComputeType, Device, LoadedModel, TranscriptionEngine};
use log::{error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Timing knobs for the monitor.
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    /// Monitor tick interval.
    pub tick: Duration,
    /// How long a stopping monitor gets to notice its signal.
    pub grace: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            grace: Duration::from_millis(500),
        }
    }
}

/// What to transcribe and how.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Plain file name inside the upload folder.
    pub file: String,
    pub model: String,
    pub language: String,
    pub device: Device,
    pub compute_type: ComputeType,
    /// Force a fresh model load even if the same model is cached.
    pub reload_model: bool,
}

pub const DEFAULT_MODEL: &str = "base";
pub const DEFAULT_LANGUAGE: &str = "ja";

impl JobRequest {
    /// Build a request from user-supplied option strings. Missing options get
    /// their defaults (`auto_device` for the device); unknown model, device or
    /// compute type names are rejected.
    pub fn from_options(
        file: &str,
        model: Option<&str>,
        language: Option<&str>,
        device: Option<&str>,
        auto_device: Device,
        compute_type: Option<&str>,
        reload_model: bool,
    ) -> Result<Self, JobError> {
        let file = file.trim();
        if file.is_empty() {
            return Err(JobError::InvalidRequest("no file selected".to_string()));
        }
        let model = model.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL);
        let model = canonical_model_name(model)
            .ok_or_else(|| JobError::InvalidRequest(format!("Unknown model: {}", model)))?;
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);
        Ok(Self {
            file: file.to_string(),
            model: model.to_string(),
            language: language.to_string(),
            device: Device::resolve(device, auto_device).map_err(JobError::InvalidRequest)?,
            compute_type: ComputeType::parse(compute_type).map_err(JobError::InvalidRequest)?,
            reload_model,
        })
    }
}

struct CachedModel {
    requested: String,
    device: Device,
    model: Arc<dyn LoadedModel>,
}

struct Transcribed {
    output: String,
    elapsed: f64,
}

pub struct JobRunner {
    state: Arc<ProgressState>,
    engine: Arc<dyn TranscriptionEngine>,
    dirs: WorkDirs,
    settings: JobSettings,
    model: Mutex<Option<CachedModel>>,
    monitors: MonitorSlot,
}

impl JobRunner {
    pub fn new(
        state: Arc<ProgressState>,
        engine: Arc<dyn TranscriptionEngine>,
        dirs: WorkDirs,
        settings: JobSettings,
    ) -> Self {
        Self {
            state,
            engine,
            dirs,
            settings,
            model: Mutex::new(None),
            monitors: MonitorSlot::default(),
        }
    }

    /// Drive the job to `completed` or `error`. Every path ends in exactly one
    /// terminal write, which also frees the job slot.
    pub async fn run(&self, ticket: JobTicket, job_id: Uuid, request: JobRequest) {
        info!(
            "[job {}] {}: model={} language={} device={} compute={:?}",
            job_id, request.file, request.model, request.language, request.device, request.compute_type
        );
        match self.execute(ticket, job_id, &request).await {
            Ok(done) => {
                info!(
                    "[job {}] {} transcribed in {:.2}s -> {}",
                    job_id, request.file, done.elapsed, done.output
                );
                self.state.finish(
                    ticket,
                    JobStatus::Completed,
                    &request.file,
                    100,
                    format!(
                        "Transcription complete ({:.2}s). Output: {}",
                        done.elapsed, done.output
                    ),
                    done.elapsed,
                );
            }
            Err(e) => {
                error!("[job {}] {} failed: {}", job_id, request.file, e);
                self.fail(ticket, &request.file, &e.to_string());
            }
        }
    }

    /// Terminal error write, keeping the last progress seen for this file.
    pub(crate) fn fail(&self, ticket: JobTicket, file: &str, message: &str) {
        let last = self.state.snapshot();
        let (progress, elapsed) = if last.file == file {
            (last.progress, last.elapsed_seconds)
        } else {
            (0, 0.0)
        };
        self.state
            .finish(ticket, JobStatus::Error, file, progress, message, elapsed);
    }

    async fn execute(
        &self,
        ticket: JobTicket,
        job_id: Uuid,
        request: &JobRequest,
    ) -> Result<Transcribed, JobError> {
        let model = self.ensure_model(ticket, job_id, request).await?;

        // A monitor from an earlier job that missed its stop signal must be gone
        // before this job's first processing write.
        if self.monitors.has_stale() {
            warn!("[job {}] stopping a monitor left over from an earlier job", job_id);
        }
        self.monitors.supersede(self.settings.grace).await;

        let input = self.dirs.upload.join(&request.file);
        if !input.is_file() {
            return Err(JobError::InputNotFound(request.file.clone()));
        }

        let started = Instant::now();
        self.state.update(
            ticket,
            JobStatus::Processing,
            &request.file,
            0,
            format!("Transcribing {}...", request.file),
            0.0,
        );

        let scope = CaptureScope::open();
        let monitor = spawn_monitor(
            self.state.clone(),
            ticket,
            request.file.clone(),
            scope.capture(),
            started,
            self.settings.tick,
        );

        let mut sink = scope.sink();
        let audio = input.clone();
        let language = request.language.clone();
        let fp16 = request.compute_type.fp16();
        let result = tokio::task::spawn_blocking(move || {
            model.transcribe(&audio, &language, fp16, &mut sink)
        })
        .await;

        if let Some(stuck) = monitor.stop(self.settings.grace).await {
            warn!(
                "[job {}] monitor did not stop within {:?}, parking it",
                job_id, self.settings.grace
            );
            self.monitors.park(stuck);
        }
        drop(scope);

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(JobError::EngineExecution(e)),
            Err(e) => return Err(JobError::EngineExecution(format!("engine task aborted: {}", e))),
        };
        let elapsed = started.elapsed().as_secs_f64();
        let output = self.persist(job_id, &request.file, &input, &text).await?;
        Ok(Transcribed { output, elapsed })
    }

    fn cached_model(&self, requested: &str, device: Device) -> Option<Arc<dyn LoadedModel>> {
        let cache = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|c| c.requested == requested && c.device == device)
            .map(|c| c.model.clone())
    }

    /// `loading_model` phase, skipped when the requested model is cached. A
    /// failure on a non-default device is retried once on the fallback device.
    async fn ensure_model(
        &self,
        ticket: JobTicket,
        job_id: Uuid,
        request: &JobRequest,
    ) -> Result<Arc<dyn LoadedModel>, JobError> {
        if !request.reload_model {
            if let Some(model) = self.cached_model(&request.model, request.device) {
                return Ok(model);
            }
        }

        let started = Instant::now();
        self.state.update(
            ticket,
            JobStatus::LoadingModel,
            &request.file,
            0,
            format!("Loading model {} on {}...", request.model, request.device),
            0.0,
        );

        let loaded = match self.load(&request.model, request.device).await {
            Ok(model) => model,
            Err(reason) if request.device != Device::FALLBACK => {
                warn!(
                    "[job {}] loading {} on {} failed ({}), falling back to {}",
                    job_id, request.model, request.device, reason, Device::FALLBACK
                );
                self.state.update(
                    ticket,
                    JobStatus::LoadingModel,
                    &request.file,
                    0,
                    format!(
                        "Loading model {} on {} failed, retrying on {}...",
                        request.model,
                        request.device,
                        Device::FALLBACK
                    ),
                    started.elapsed().as_secs_f64(),
                );
                self.load(&request.model, Device::FALLBACK)
                    .await
                    .map_err(|reason| JobError::ModelLoad {
                        model: request.model.clone(),
                        device: Device::FALLBACK.to_string(),
                        reason,
                    })?
            }
            Err(reason) => {
                return Err(JobError::ModelLoad {
                    model: request.model.clone(),
                    device: request.device.to_string(),
                    reason,
                })
            }
        };

        let load_secs = started.elapsed().as_secs_f64();
        info!(
            "[job {}] model {} loaded on {} ({:.2}s)",
            job_id,
            loaded.name(),
            loaded.device(),
            load_secs
        );
        *self.model.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedModel {
            requested: request.model.clone(),
            device: request.device,
            model: loaded.clone(),
        });
        self.state.update(
            ticket,
            JobStatus::Idle,
            &request.file,
            0,
            format!("Model {} ready on {}", loaded.name(), loaded.device()),
            load_secs,
        );
        Ok(loaded)
    }

    async fn load(&self, name: &str, device: Device) -> Result<Arc<dyn LoadedModel>, String> {
        let engine = self.engine.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || engine.load_model(&name, device))
            .await
            .map_err(|e| format!("model loading aborted: {}", e))?
    }

    /// Write `<stem>.txt` into the output folder and move the input to the
    /// processed folder.
    async fn persist(
        &self,
        job_id: Uuid,
        file: &str,
        input: &Path,
        text: &str,
    ) -> Result<String, JobError> {
        let output = artifact_name(file);
        let output_path = self.dirs.output.join(&output);
        tokio::fs::write(&output_path, text)
            .await
            .map_err(|source| JobError::ArtifactWrite {
                file: output.clone(),
                source,
            })?;
        info!("[job {}] transcript saved to {}", job_id, output_path.display());

        let processed = self.dirs.processed.join(file);
        if let Err(source) = move_file(input, &processed).await {
            // An error status must not leave a published transcript behind.
            if let Err(e) = tokio::fs::remove_file(&output_path).await {
                warn!("[job {}] could not withdraw {}: {}", job_id, output_path.display(), e);
            }
            return Err(JobError::ArchiveInput {
                file: file.to_string(),
                source,
            });
        }
        info!("[job {}] moved {} to {}", job_id, file, processed.display());
        Ok(output)
    }
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}
