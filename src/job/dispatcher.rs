//! Single-flight entry point for transcription jobs, and the poller's view.

use super::error::JobError;
use super::runner::{JobRequest, JobRunner, JobSettings};
use super::state::{JobTicket, ProgressSnapshot, ProgressState};
use crate::files::is_plain_file_name;
use crate::paths::WorkDirs;
use crate::transcription::TranscriptionEngine;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Handle for an accepted job.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedJob {
    pub id: Uuid,
    ticket: JobTicket,
}

pub struct JobDispatcher {
    state: Arc<ProgressState>,
    runner: Arc<JobRunner>,
    dirs: WorkDirs,
}

impl JobDispatcher {
    pub fn new(engine: Arc<dyn TranscriptionEngine>, dirs: WorkDirs, settings: JobSettings) -> Self {
        let state = Arc::new(ProgressState::new());
        let runner = Arc::new(JobRunner::new(state.clone(), engine, dirs.clone(), settings));
        Self { state, runner, dirs }
    }

    pub fn reader(&self) -> ProgressReader {
        ProgressReader {
            state: self.state.clone(),
        }
    }

    /// Accept a job and start it in the background, or reject it right away.
    /// The busy check and taking the job slot happen under the state lock, so
    /// two racing submissions can never both be accepted.
    pub fn submit(&self, request: JobRequest) -> Result<SubmittedJob, JobError> {
        let ticket = self.state.try_claim(&request.file).map_err(|e| {
            warn!("[dispatch] rejected {}: {}", request.file, e);
            e
        })?;
        if let Err(e) = self.check_input(&request.file) {
            self.state.release(ticket);
            warn!("[dispatch] rejected {}: {}", request.file, e);
            return Err(e);
        }

        let id = Uuid::new_v4();
        info!("[dispatch] accepted job {} for {}", id, request.file);

        let file = request.file.clone();
        let runner = self.runner.clone();
        let task = tokio::spawn(async move { runner.run(ticket, id, request).await });

        let runner = self.runner.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!("[job {}] aborted: {}", id, e);
                runner.fail(ticket, &file, &format!("Job aborted unexpectedly: {}", e));
            }
        });

        Ok(SubmittedJob { id, ticket })
    }

    fn check_input(&self, file: &str) -> Result<(), JobError> {
        if !is_plain_file_name(file) {
            return Err(JobError::InvalidRequest(format!("not a plain file name: {:?}", file)));
        }
        if !self.dirs.upload.join(file).is_file() {
            return Err(JobError::InputNotFound(file.to_string()));
        }
        Ok(())
    }
}

/// Read-only access for pollers. Cheap to clone; never waits on the job itself.
#[derive(Clone)]
pub struct ProgressReader {
    state: Arc<ProgressState>,
}

impl ProgressReader {
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    /// Snapshot for the aggregate page; shows a completed job once, then resets
    /// the record to idle.
    pub fn page_view(&self) -> ProgressSnapshot {
        self.state.acknowledge_completed()
    }

    /// Input file of the job currently holding the slot. It must not be
    /// removed from the upload folder until the job has finished.
    pub fn in_flight_file(&self) -> Option<String> {
        self.state.in_flight_file()
    }

    pub fn is_running(&self, job: &SubmittedJob) -> bool {
        self.state.is_active(job.ticket)
    }

    /// Poll until `job` has reached its terminal status and return it.
    pub async fn wait_for(&self, job: &SubmittedJob, poll: Duration) -> ProgressSnapshot {
        let mut last_logged = None;
        while self.is_running(job) {
            let snap = self.snapshot();
            if last_logged != Some((snap.status, snap.progress)) {
                debug!(
                    "[job {}] {:?} {}% {:.1}s",
                    job.id, snap.status, snap.progress, snap.elapsed_seconds
                );
                last_logged = Some((snap.status, snap.progress));
            }
            tokio::time::sleep(poll).await;
        }
        self.snapshot()
    }
}
