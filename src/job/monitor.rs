//! Periodic task that keeps the progress record moving while the engine blocks.

use super::extractor::ProgressCapture;
use super::state::{JobStatus, JobTicket, ProgressState};
use log::{debug, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A running monitor loop and the token that stops it.
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop and wait up to `grace` for it to exit. Hands the handle
    /// back if the loop is still running afterwards.
    pub async fn stop(mut self, grace: Duration) -> Option<MonitorHandle> {
        self.token.cancel();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => None,
            Err(_) => Some(self),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start ticking for one job. Every tick writes `processing` with the latest
/// percentage seen so far and the elapsed time since `started`, whether or not
/// the capture produced anything new. The loop ends when stopped or as soon as
/// its ticket no longer owns the state.
pub fn spawn_monitor(
    state: Arc<ProgressState>,
    ticket: JobTicket,
    file: String,
    capture: ProgressCapture,
    started: Instant,
    tick: Duration,
) -> MonitorHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut current = 0u8;
        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Some(percent) = capture.check_progress() {
                if percent != current {
                    debug!("[monitor] {} at {}%", file, percent);
                }
                current = percent;
            }
            let elapsed = started.elapsed().as_secs_f64();
            let message = format!("Transcribing {}: {}% ({:.1}s)", file, current, elapsed);
            if !state.update(ticket, JobStatus::Processing, &file, current, message, elapsed) {
                debug!("[monitor] {} no longer owns the progress record, exiting", file);
                break;
            }
        }
    });
    MonitorHandle { token, task }
}

/// Holds a monitor that did not exit within its grace period, so the next job
/// can make sure it is gone before writing its own first update.
#[derive(Default)]
pub struct MonitorSlot {
    stale: Mutex<Option<MonitorHandle>>,
}

impl MonitorSlot {
    pub fn park(&self, handle: MonitorHandle) {
        let previous = self
            .stale
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    pub fn has_stale(&self) -> bool {
        self.stale
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop any parked monitor: signal, wait up to `grace`, then abort it.
    pub async fn supersede(&self, grace: Duration) {
        let stale = self
            .stale
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(stale) = stale else {
            return;
        };
        if let Some(stuck) = stale.stop(grace).await {
            warn!("[monitor] previous monitor ignored stop signal for {:?}, aborting it", grace);
            stuck.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::extractor::CaptureScope;
    use std::io::Write;

    const TICK: Duration = Duration::from_millis(20);

    fn processing(state: &ProgressState, file: &str) -> JobTicket {
        let ticket = state.try_claim(file).unwrap();
        assert!(state.update(ticket, JobStatus::Processing, file, 0, "starting", 0.0));
        ticket
    }

    #[tokio::test]
    async fn adopts_new_percentages_and_keeps_elapsed_moving() {
        let state = Arc::new(ProgressState::new());
        let ticket = processing(&state, "talk.mp3");
        let scope = CaptureScope::open();
        let mut sink = scope.sink();
        let monitor = spawn_monitor(
            state.clone(),
            ticket,
            "talk.mp3".into(),
            scope.capture(),
            Instant::now(),
            TICK,
        );

        sink.write_all(b" 25%|##| 25/100\n").unwrap();
        tokio::time::sleep(TICK * 4).await;
        let first = state.snapshot();
        assert_eq!(first.progress, 25);

        // no new output: progress holds, elapsed keeps advancing
        tokio::time::sleep(TICK * 4).await;
        let second = state.snapshot();
        assert_eq!(second.progress, 25);
        assert!(second.elapsed_seconds > first.elapsed_seconds);
        assert_eq!(second.status, JobStatus::Processing);

        assert!(monitor.stop(Duration::from_millis(500)).await.is_none());
    }

    #[tokio::test]
    async fn stop_is_acknowledged_and_no_more_ticks_land() {
        let state = Arc::new(ProgressState::new());
        let ticket = processing(&state, "a.wav");
        let scope = CaptureScope::open();
        let monitor = spawn_monitor(
            state.clone(),
            ticket,
            "a.wav".into(),
            scope.capture(),
            Instant::now(),
            TICK,
        );
        tokio::time::sleep(TICK * 2).await;
        assert!(monitor.stop(Duration::from_millis(500)).await.is_none());

        let frozen = state.snapshot();
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(state.snapshot(), frozen);
    }

    #[tokio::test]
    async fn exits_by_itself_once_the_job_is_finished() {
        let state = Arc::new(ProgressState::new());
        let ticket = processing(&state, "a.wav");
        let scope = CaptureScope::open();
        let monitor = spawn_monitor(
            state.clone(),
            ticket,
            "a.wav".into(),
            scope.capture(),
            Instant::now(),
            TICK,
        );
        state.finish(ticket, JobStatus::Completed, "a.wav", 100, "done", 1.0);
        tokio::time::sleep(TICK * 3).await;
        assert!(monitor.is_finished());
        assert_eq!(state.snapshot().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn supersede_clears_a_parked_monitor() {
        let state = Arc::new(ProgressState::new());
        let ticket = processing(&state, "a.wav");
        let scope = CaptureScope::open();
        let monitor = spawn_monitor(
            state.clone(),
            ticket,
            "a.wav".into(),
            scope.capture(),
            Instant::now(),
            TICK,
        );
        let slot = MonitorSlot::default();
        slot.park(monitor);
        assert!(slot.has_stale());
        slot.supersede(Duration::from_millis(500)).await;
        assert!(!slot.has_stale());
    }

    struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn supersede_aborts_a_monitor_that_ignores_its_signal() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let deaf = MonitorHandle {
            token: CancellationToken::new(),
            task: tokio::spawn(async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(10)).await;
            }),
        };
        let slot = MonitorSlot::default();
        slot.park(deaf);
        assert!(slot.has_stale());

        let started = Instant::now();
        slot.supersede(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!slot.has_stale());
    }
}
