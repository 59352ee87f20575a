//! Per-slot state machine binding one backend to the unit of work it runs.
//!
//! ```text
//!            run_work              clean completion
//!  waiting ───────────► running ───────────────────► stopped
//!     ▲                    │  failed / killed             │
//!     │                    ▼                              │
//!     │                   dead ◄── killing ◄── kill_work  │
//!     └────────────────────── reuse ◄─────────────────────┘
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::worker_pool::PushBuffer;
use crate::core::{
    LogLine, PushMessage, SchedulerError, WorkDescriptor, WorkLogger, WorkResponse, WorkResult,
    WorkerBackend,
};

/// Lifecycle status of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    /// Idle, ready for `run_work`.
    Waiting,
    /// Running a unit of work.
    Running,
    /// Finished cleanly; `reuse` returns it to `Waiting`.
    Stopped,
    /// Kill requested; waiting for the backend's completion.
    Killing,
    /// Terminal. The slot must be destroyed.
    Dead,
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Killing => "killing",
            Self::Dead => "dead",
        };
        f.write_str(name)
    }
}

struct TrackerState {
    status: TrackerStatus,
    work_result: Option<WorkResult>,
    /// Kill request for the run in progress.
    kill: Option<CancellationToken>,
}

/// Binds one pooled backend to the unit of work it is currently running.
pub struct WorkerTracker {
    label: String,
    backend: Arc<dyn WorkerBackend>,
    relay: Option<PushBuffer>,
    state: Mutex<TrackerState>,
}

impl WorkerTracker {
    /// Tracker for `backend`, starting in `Waiting`.
    pub fn new(label: impl Into<String>, backend: Arc<dyn WorkerBackend>) -> Self {
        Self {
            label: label.into(),
            backend,
            relay: None,
            state: Mutex::new(TrackerState {
                status: TrackerStatus::Waiting,
                work_result: None,
                kill: None,
            }),
        }
    }

    /// Forward every captured log line to `relay` as well as the work log.
    #[must_use]
    pub fn with_relay(mut self, relay: PushBuffer) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        self.state.lock().status
    }

    /// The backend this tracker controls.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn WorkerBackend> {
        &self.backend
    }

    /// Descriptor of the work result currently held, if any.
    #[must_use]
    pub fn current_work(&self) -> Option<WorkDescriptor> {
        self.state
            .lock()
            .work_result
            .as_ref()
            .map(|r| r.descriptor().clone())
    }

    /// Start `work` on the backend, recording it under `work_dir`.
    ///
    /// The returned task resolves with the tracker's status once the backend has completed
    /// (successfully or not) and the work result has been closed. The result stays with the
    /// tracker until [`take_work_result`](Self::take_work_result).
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` if the tracker already holds a work result or is not
    /// `Waiting`; I/O errors from creating the work directory.
    pub fn run_work(
        self: &Arc<Self>,
        work: WorkDescriptor,
        work_dir: &Path,
    ) -> Result<JoinHandle<TrackerStatus>, SchedulerError> {
        let kill = CancellationToken::new();
        {
            let mut state = self.state.lock();
            if let Some(held) = state.work_result.as_ref() {
                return Err(SchedulerError::InvalidState(format!(
                    "tracker {} already holds work {}",
                    self.label,
                    held.descriptor().uuid
                )));
            }
            if state.status != TrackerStatus::Waiting {
                return Err(SchedulerError::InvalidState(format!(
                    "tracker {} cannot run work while {}",
                    self.label, state.status
                )));
            }
            state.work_result = Some(WorkResult::initialise(work_dir, work.clone())?);
            state.status = TrackerStatus::Running;
            state.kill = Some(kill.clone());
        }
        info!(slot = %self.label, uuid = %work.uuid, kind = %work.work_kind, "work started");

        let tracker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let (logger, mut lines) = WorkLogger::channel();
            let outcome = {
                let mut run = tracker.backend.run(&work, &logger);
                let mut terminated = false;
                loop {
                    tokio::select! {
                        biased;
                        outcome = &mut run => break outcome,
                        Some(line) = lines.recv() => tracker.relay_log(&work.uuid, line),
                        // Repeated once the run has been polled, so a kill that raced the
                        // backend's start is still delivered.
                        () = kill.cancelled(), if !terminated => {
                            terminated = true;
                            tracker.backend.terminate().await;
                        }
                    }
                }
            };
            while let Ok(line) = lines.try_recv() {
                tracker.relay_log(&work.uuid, line);
            }
            tracker.complete_work(WorkResponse::from(outcome))
        }))
    }

    fn relay_log(&self, uuid: &str, line: LogLine) {
        {
            let mut state = self.state.lock();
            if let Some(result) = state.work_result.as_mut() {
                if let Err(e) = result.append_captured(&line) {
                    warn!(slot = %self.label, uuid, error = %e, "failed to append work log");
                }
            }
        }
        if let Some(relay) = &self.relay {
            relay.push(PushMessage::Log {
                uuid: uuid.to_string(),
                captured_at: line.captured_at,
                message: line.message,
            });
        }
    }

    /// Record the backend's completion: append a final log line, close the work result and
    /// move to `Dead` (killed or failed) or `Stopped`.
    pub(crate) fn complete_work(&self, response: WorkResponse) -> TrackerStatus {
        let mut state = self.state.lock();
        let failed = response.is_failure();
        match state.work_result.as_mut() {
            Some(result) => {
                let line = response
                    .exception
                    .as_ref()
                    .map_or_else(|| "work completed".to_string(), |e| format!("work failed: {e}"));
                if let Err(e) = result.append_work_log(&line) {
                    warn!(slot = %self.label, error = %e, "failed to append completion line");
                }
                if let Err(e) = result.close(response) {
                    error!(slot = %self.label, error = %e, "failed to close work result");
                }
            }
            None => error!(slot = %self.label, "completion arrived without an active work result"),
        }

        state.kill = None;
        state.status = if state.status == TrackerStatus::Killing || failed {
            TrackerStatus::Dead
        } else {
            TrackerStatus::Stopped
        };
        info!(slot = %self.label, status = %state.status, "work finished");
        state.status
    }

    /// Hand the closed work result over. The tracker keeps no reference to it afterwards.
    pub fn take_work_result(&self) -> Option<WorkResult> {
        self.state.lock().work_result.take()
    }

    /// Ask the backend to stop the running unit.
    ///
    /// The tracker moves to `Killing` and reaches `Dead` when the backend's completion
    /// arrives. A tracker with nothing running goes straight to `Dead`.
    pub async fn kill_work(&self) {
        let running = {
            let mut state = self.state.lock();
            match state.status {
                TrackerStatus::Dead => return,
                TrackerStatus::Running | TrackerStatus::Killing => {
                    state.status = TrackerStatus::Killing;
                    if let Some(kill) = &state.kill {
                        kill.cancel();
                    }
                    true
                }
                TrackerStatus::Waiting | TrackerStatus::Stopped => {
                    state.status = TrackerStatus::Dead;
                    false
                }
            }
        };
        if running {
            info!(slot = %self.label, "killing work");
            self.backend.terminate().await;
        } else {
            debug!(slot = %self.label, "killed idle tracker");
        }
    }

    /// Return a `Stopped` tracker to `Waiting`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` unless the status is exactly `Stopped`.
    pub fn reuse(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.status != TrackerStatus::Stopped {
            return Err(SchedulerError::InvalidState(format!(
                "tracker {} cannot be reused while {}",
                self.label, state.status
            )));
        }
        if let Some(stale) = state.work_result.take() {
            error!(
                slot = %self.label,
                uuid = %stale.descriptor().uuid,
                "tracker reused while still holding a work result, clearing it"
            );
        }
        state.status = TrackerStatus::Waiting;
        Ok(())
    }
}

impl fmt::Debug for WorkerTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTracker")
            .field("label", &self.label)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct ScriptedBackend {
        outcome: Result<Value, String>,
        hold: bool,
        terminated: Notify,
    }

    impl ScriptedBackend {
        fn ok(value: Value) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(value),
                hold: false,
                terminated: Notify::new(),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(message.to_string()),
                hold: false,
                terminated: Notify::new(),
            })
        }

        fn holding() -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(json!("finished anyway")),
                hold: true,
                terminated: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl WorkerBackend for ScriptedBackend {
        async fn run(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String> {
            log.log(format!("running {}", work.work_kind));
            if self.hold {
                self.terminated.notified().await;
            }
            self.outcome.clone()
        }

        async fn terminate(&self) {
            self.terminated.notify_one();
        }
    }

    /// Honours `terminate` only while a run is in progress.
    #[derive(Default)]
    struct RunScopedBackend {
        active: parking_lot::Mutex<Option<CancellationToken>>,
    }

    #[async_trait]
    impl WorkerBackend for RunScopedBackend {
        async fn run(&self, _work: &WorkDescriptor, _log: &WorkLogger) -> Result<Value, String> {
            let cancel = CancellationToken::new();
            *self.active.lock() = Some(cancel.clone());
            cancel.cancelled().await;
            Err("terminated".to_string())
        }

        async fn terminate(&self) {
            if let Some(cancel) = self.active.lock().take() {
                cancel.cancel();
            }
        }
    }

    fn work(uuid: &str) -> WorkDescriptor {
        WorkDescriptor::new("render").with_uuid(uuid)
    }

    #[tokio::test]
    async fn test_clean_run_stops_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", ScriptedBackend::ok(json!(1))));

        let done = tracker.run_work(work("a"), &dir.path().join("a")).unwrap();
        assert_eq!(done.await.unwrap(), TrackerStatus::Stopped);

        let result = tracker.take_work_result().unwrap();
        assert!(result.is_closed());
        assert_eq!(result.status().response, Some(json!(1)));
        assert!(result.log_text().contains("running render"));
        assert!(result.log_text().contains("work completed"));

        tracker.reuse().unwrap();
        assert_eq!(tracker.status(), TrackerStatus::Waiting);
        assert!(tracker.current_work().is_none());
    }

    #[tokio::test]
    async fn test_failed_run_is_dead_and_not_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", ScriptedBackend::failing("boom")));

        let done = tracker.run_work(work("a"), dir.path()).unwrap();
        assert_eq!(done.await.unwrap(), TrackerStatus::Dead);
        let result = tracker.take_work_result().unwrap();
        assert_eq!(result.status().exception.as_deref(), Some("boom"));
        assert!(matches!(tracker.reuse(), Err(SchedulerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_run_while_holding_result_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", ScriptedBackend::holding()));

        let _running = tracker.run_work(work("a"), &dir.path().join("a")).unwrap();
        let err = tracker.run_work(work("b"), &dir.path().join("b")).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState(_)));
        tracker.kill_work().await;
    }

    #[tokio::test]
    async fn test_kill_finalizes_to_dead_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", ScriptedBackend::holding()));

        let done = tracker.run_work(work("a"), dir.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.kill_work().await;
        assert_eq!(done.await.unwrap(), TrackerStatus::Dead);
        assert!(tracker.take_work_result().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_kill_before_backend_starts_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", Arc::new(RunScopedBackend::default())));

        // The spawned run has not been polled yet, so the first terminate finds nothing.
        let done = tracker.run_work(work("a"), dir.path()).unwrap();
        tracker.kill_work().await;

        let status = tokio::time::timeout(Duration::from_secs(5), done).await.unwrap().unwrap();
        assert_eq!(status, TrackerStatus::Dead);
        let result = tracker.take_work_result().unwrap();
        assert_eq!(result.status().exception.as_deref(), Some("terminated"));
    }

    #[tokio::test]
    async fn test_reuse_requires_stopped() {
        let tracker = WorkerTracker::new("slot-0", ScriptedBackend::ok(json!(1)));
        assert!(tracker.reuse().is_err());
        tracker.kill_work().await;
        assert_eq!(tracker.status(), TrackerStatus::Dead);
        assert!(tracker.reuse().is_err());
    }

    #[tokio::test]
    async fn test_reuse_clears_stale_result() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(WorkerTracker::new("slot-0", ScriptedBackend::ok(json!(1))));
        let done = tracker.run_work(work("a"), dir.path()).unwrap();
        done.await.unwrap();

        tracker.reuse().unwrap();
        assert!(tracker.take_work_result().is_none());
    }

    #[tokio::test]
    async fn test_log_lines_are_relayed() {
        let dir = tempfile::tempdir().unwrap();
        let relay = PushBuffer::new();
        let tracker = Arc::new(
            WorkerTracker::new("slot-0", ScriptedBackend::ok(json!(1))).with_relay(relay.clone()),
        );

        tracker.run_work(work("a"), dir.path()).unwrap().await.unwrap();
        let batch = relay.take_batch(10);
        assert_eq!(batch.len(), 1);
        assert!(matches!(
            &batch[0],
            PushMessage::Log { uuid, message, .. } if uuid == "a" && message == "running render"
        ));
    }
}
