//! Shared job status record read by pollers and written by the active job.

use super::error::JobError;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle of the current (or most recent) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    LoadingModel,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// A job owns the engine while in one of these.
    pub fn is_busy(self) -> bool {
        matches!(self, JobStatus::LoadingModel | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Edges of the job state machine.
    fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Idle | Completed | Error, LoadingModel | Processing) => true,
            (LoadingModel, LoadingModel | Idle | Error) => true,
            (Processing, Processing | Completed | Error) => true,
            _ => false,
        }
    }
}

/// A consistent copy of all five fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub file: String,
    pub progress: u8,
    pub message: String,
    #[serde(rename = "elapsed")]
    pub elapsed_seconds: f64,
}

/// Proof of owning the single job slot. Writes carrying a ticket that is no
/// longer the active one are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTicket {
    generation: u64,
}

struct Inner {
    current: ProgressSnapshot,
    active: Option<u64>,
    /// Input named by the active claim, known before the job's first write.
    active_file: Option<String>,
    next_generation: u64,
}

/// The process-wide progress record. All reads and writes go through one lock
/// that is never held across I/O.
pub struct ProgressState {
    inner: Mutex<Inner>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: ProgressSnapshot::default(),
                active: None,
                active_file: None,
                next_generation: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().current.clone()
    }

    /// Take the job slot for `file`. Fails while a job is claimed or the status
    /// is busy; the visible fields are left untouched either way.
    pub(crate) fn try_claim(&self, file: &str) -> Result<JobTicket, JobError> {
        let mut inner = self.lock();
        if inner.active.is_some() || inner.current.status.is_busy() {
            return Err(JobError::JobInProgress);
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.active = Some(generation);
        inner.active_file = Some(file.to_string());
        Ok(JobTicket { generation })
    }

    /// Give the slot back without having written anything (rejected before launch).
    pub(crate) fn release(&self, ticket: JobTicket) {
        let mut inner = self.lock();
        if inner.active == Some(ticket.generation) {
            inner.active = None;
            inner.active_file = None;
        }
    }

    pub(crate) fn is_active(&self, ticket: JobTicket) -> bool {
        self.lock().active == Some(ticket.generation)
    }

    /// Input of the job holding the slot, if any.
    pub(crate) fn in_flight_file(&self) -> Option<String> {
        self.lock().active_file.clone()
    }

    /// Replace all fields for a non-terminal status. Returns false when the write
    /// was dropped (stale ticket or illegal transition).
    ///
    /// Within `processing` for the same file, progress never moves backwards and
    /// elapsed time never shrinks.
    pub fn update(
        &self,
        ticket: JobTicket,
        status: JobStatus,
        file: &str,
        progress: u8,
        message: impl Into<String>,
        elapsed_seconds: f64,
    ) -> bool {
        if status.is_terminal() {
            return false;
        }
        let mut inner = self.lock();
        if inner.active != Some(ticket.generation) {
            return false;
        }
        apply(&mut inner.current, status, file, progress, message.into(), elapsed_seconds)
    }

    /// Write the terminal status and free the slot in one step, so the next
    /// submission can be accepted as soon as a poller sees the outcome.
    pub(crate) fn finish(
        &self,
        ticket: JobTicket,
        status: JobStatus,
        file: &str,
        progress: u8,
        message: impl Into<String>,
        elapsed_seconds: f64,
    ) -> bool {
        let mut inner = self.lock();
        if inner.active != Some(ticket.generation) {
            return false;
        }
        inner.active = None;
        inner.active_file = None;
        if !status.is_terminal() {
            return false;
        }
        let message = message.into();
        if !apply(&mut inner.current, status, file, progress, message.clone(), elapsed_seconds) {
            // A job that dies before its first write (e.g. panicking while
            // loading) still has to surface its outcome.
            inner.current = ProgressSnapshot {
                status,
                file: file.to_string(),
                progress: progress.min(100),
                message,
                elapsed_seconds: elapsed_seconds.max(0.0),
            };
        }
        true
    }

    /// Read used by the aggregate page view: returns the current fields and, if
    /// the last job completed, clears the banner so it is shown only once.
    pub fn acknowledge_completed(&self) -> ProgressSnapshot {
        let mut inner = self.lock();
        let seen = inner.current.clone();
        if inner.active.is_none() && seen.status == JobStatus::Completed {
            inner.current = ProgressSnapshot::default();
        }
        seen
    }
}

fn apply(
    current: &mut ProgressSnapshot,
    status: JobStatus,
    file: &str,
    progress: u8,
    message: String,
    elapsed_seconds: f64,
) -> bool {
    if current.status != status && !current.status.can_transition_to(status) {
        return false;
    }
    let same_phase = current.status == status && current.file == file;
    let mut progress = progress.min(100);
    let mut elapsed = elapsed_seconds.max(0.0);
    if same_phase && status == JobStatus::Processing {
        progress = progress.max(current.progress);
    }
    if same_phase && status.is_busy() {
        elapsed = elapsed.max(current.elapsed_seconds);
    }
    *current = ProgressSnapshot {
        status,
        file: file.to_string(),
        progress,
        message,
        elapsed_seconds: elapsed,
    };
    true
}
