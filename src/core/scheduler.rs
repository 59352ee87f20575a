//! The authoritative FIFO queue and completion tracker for units of work.
//!
//! Each descriptor moves `queued → running → completed`. Pools drive it through the
//! [`SchedulerApi`] seam (`poll_for_work` / `push`); callers hold a [`CompletionHandle`]
//! that resolves once the unit's result has been reported back.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::{SchedulerError, WorkDescriptor, WorkResultData};
use crate::infra::archive::WorkArchive;
use crate::util::ids::new_work_id;

/// Pool name recorded for audit events raised before a unit is assigned.
const SCHEDULER_POOL: &str = "scheduler";

/// One message a pool reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A log line captured while a unit was running.
    Log {
        /// Unit the line belongs to.
        uuid: String,
        /// When the line was captured.
        captured_at: DateTime<Utc>,
        /// Line text.
        message: String,
    },
    /// A unit finished; carries its serialized work result.
    Completed {
        /// When completion was observed.
        captured_at: DateTime<Utc>,
        /// Serialized work result.
        result: WorkResultData,
    },
}

impl PushMessage {
    /// Capture time used to order a batch.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Self::Log { captured_at, .. } | Self::Completed { captured_at, .. } => *captured_at,
        }
    }

    /// Unit the message refers to.
    #[must_use]
    pub fn uuid(&self) -> &str {
        match self {
            Self::Log { uuid, .. } => uuid,
            Self::Completed { result, .. } => result.uuid(),
        }
    }
}

/// Acknowledgement of a pushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Number of messages accepted.
    pub accepted: usize,
}

/// Notifications emitted to subscribers (e.g. a work-source scanner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A unit was enqueued.
    WorkQueued {
        /// Unit uuid.
        uuid: String,
    },
    /// A pool took a unit.
    WorkStarted {
        /// Unit uuid.
        uuid: String,
        /// Pool that polled it.
        pool_id: String,
    },
    /// A unit's completion was recorded.
    WorkCompleted {
        /// Unit uuid.
        uuid: String,
        /// Whether the response carries an exception.
        failed: bool,
    },
    /// A log line relayed from a running unit.
    WorkLog {
        /// Unit uuid.
        uuid: String,
        /// Line text.
        message: String,
    },
    /// A poll found the queue empty; upstream sources should look for more work.
    NoWork,
}

/// What a worker pool needs from the scheduler. Transport agnostic.
#[async_trait]
pub trait SchedulerApi: Send + Sync + 'static {
    /// Take the oldest queued unit for `pool_id`, if any.
    async fn poll_for_work(&self, pool_id: &str) -> Result<Option<WorkDescriptor>, SchedulerError>;

    /// Deliver a batch of log and completion messages.
    async fn push(&self, pool_id: &str, batch: &[PushMessage]) -> Result<PushAck, SchedulerError>;
}

/// Resolves with a unit's result once the scheduler records its completion.
#[derive(Debug)]
pub struct CompletionHandle {
    uuid: String,
    rx: oneshot::Receiver<WorkResultData>,
}

impl CompletionHandle {
    /// Uuid of the unit this handle waits for.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Wait for the unit's result. Execution failures arrive as a result whose response
    /// carries an exception.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Closed` if the scheduler was dropped first.
    pub async fn wait(self) -> Result<WorkResultData, SchedulerError> {
        self.rx.await.map_err(|_| SchedulerError::Closed)
    }
}

struct RunningWork {
    tx: oneshot::Sender<WorkResultData>,
    pool_id: String,
    started_at: Instant,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<(WorkDescriptor, oneshot::Sender<WorkResultData>)>,
    queued_ids: HashSet<String>,
    running: HashMap<String, RunningWork>,
}

impl SchedulerState {
    fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }
}

/// In-memory FIFO scheduler.
pub struct QueueScheduler {
    known_kinds: HashSet<String>,
    state: Mutex<SchedulerState>,
    events: broadcast::Sender<SchedulerEvent>,
    drained: watch::Sender<bool>,
    archive: Option<Mutex<WorkArchive>>,
    audit: Option<Arc<Mutex<dyn AuditSink>>>,
}

impl QueueScheduler {
    /// Scheduler configured by `config`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Backend` when the configuration is invalid.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let (drained, _) = watch::channel(true);
        Ok(Self {
            known_kinds: config.known_kinds.iter().cloned().collect(),
            state: Mutex::new(SchedulerState::default()),
            events,
            drained,
            archive: config
                .archive_dir
                .as_ref()
                .map(|dir| Mutex::new(WorkArchive::new(dir, config.rotate_daily))),
            audit: None,
        })
    }

    /// Record lifecycle events to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<Mutex<dyn AuditSink>>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Enqueue a unit, assigning a uuid if it has none.
    ///
    /// # Errors
    ///
    /// `DuplicateWork` if the uuid is already queued or running (the existing handle is
    /// unaffected); `UnknownWorkKind` if known kinds are configured and the kind is not one.
    pub fn push_work(&self, mut descriptor: WorkDescriptor) -> Result<CompletionHandle, SchedulerError> {
        if !descriptor.has_uuid() {
            descriptor.uuid = new_work_id();
        }
        let uuid = descriptor.uuid.clone();

        if !self.known_kinds.is_empty() && !self.known_kinds.contains(&descriptor.work_kind) {
            warn!(uuid = %uuid, kind = %descriptor.work_kind, "rejected work of unknown kind");
            self.audit(&uuid, SCHEDULER_POOL, AuditAction::Rejected, Some("unknown kind".into()));
            return Err(SchedulerError::UnknownWorkKind(descriptor.work_kind));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.queued_ids.contains(&uuid) || state.running.contains_key(&uuid) {
                drop(state);
                warn!(uuid = %uuid, "rejected duplicate work");
                self.audit(&uuid, SCHEDULER_POOL, AuditAction::Rejected, Some("duplicate".into()));
                return Err(SchedulerError::DuplicateWork(uuid));
            }
            debug!(uuid = %uuid, kind = %descriptor.work_kind, depth = state.queue.len() + 1, "work queued");
            state.queued_ids.insert(uuid.clone());
            state.queue.push_back((descriptor, tx));
            self.refresh_drained(&state);
        }

        self.emit(SchedulerEvent::WorkQueued { uuid: uuid.clone() });
        self.audit(&uuid, SCHEDULER_POOL, AuditAction::Queued, None);
        Ok(CompletionHandle { uuid, rx })
    }

    /// Pop the oldest queued unit and mark it running under `pool_id`.
    ///
    /// An empty queue emits exactly one [`SchedulerEvent::NoWork`].
    pub fn poll_for_work(&self, pool_id: &str) -> Option<WorkDescriptor> {
        let popped = {
            let mut state = self.state.lock();
            let popped = state.queue.pop_front();
            if let Some((descriptor, tx)) = popped {
                state.queued_ids.remove(&descriptor.uuid);
                state.running.insert(
                    descriptor.uuid.clone(),
                    RunningWork {
                        tx,
                        pool_id: pool_id.to_string(),
                        started_at: Instant::now(),
                    },
                );
                Some(descriptor)
            } else {
                None
            }
        };

        match popped {
            Some(descriptor) => {
                info!(pool = %pool_id, uuid = %descriptor.uuid, kind = %descriptor.work_kind, "work started");
                self.emit(SchedulerEvent::WorkStarted {
                    uuid: descriptor.uuid.clone(),
                    pool_id: pool_id.to_string(),
                });
                self.audit(&descriptor.uuid, pool_id, AuditAction::Started, None);
                Some(descriptor)
            }
            None => {
                debug!(pool = %pool_id, "no work queued");
                self.emit(SchedulerEvent::NoWork);
                None
            }
        }
    }

    /// Record a unit's completion.
    ///
    /// A running unit is removed from the running map, archived and its handle resolved. An
    /// unknown uuid (already forgotten by its pool) is only archived.
    ///
    /// # Errors
    ///
    /// Archival failures. The handle is resolved regardless.
    pub fn on_work_completed(&self, data: WorkResultData) -> Result<(), SchedulerError> {
        let uuid = data.uuid().to_string();
        let failed = data.response().is_failure();
        let running = self.state.lock().running.remove(&uuid);

        let archived = match &self.archive {
            Some(archive) => archive.lock().archive(data.clone()).map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = &archived {
            error!(uuid = %uuid, error = %e, "failed to archive completed work");
        }

        match running {
            Some(entry) => {
                info!(
                    pool = %entry.pool_id,
                    uuid = %uuid,
                    failed,
                    elapsed_ms = entry.started_at.elapsed().as_millis(),
                    "work completed"
                );
                if entry.tx.send(data).is_err() {
                    debug!(uuid = %uuid, "completion handle was dropped");
                }
                self.emit(SchedulerEvent::WorkCompleted {
                    uuid: uuid.clone(),
                    failed,
                });
                self.audit(&uuid, &entry.pool_id, AuditAction::Completed, failed.then(|| "exception".to_string()));
                self.refresh_drained(&self.state.lock());
            }
            None => warn!(uuid = %uuid, "completion for work that is not running, archived only"),
        }
        archived
    }

    /// Accept a batch reported by `pool_id`. Log lines are rebroadcast; completions are
    /// recorded. Archival failures are logged and do not fail the batch.
    pub fn push(&self, pool_id: &str, batch: &[PushMessage]) -> PushAck {
        for message in batch {
            match message {
                PushMessage::Log { uuid, message, .. } => {
                    debug!(pool = %pool_id, uuid = %uuid, line = %message, "work log");
                    self.emit(SchedulerEvent::WorkLog {
                        uuid: uuid.clone(),
                        message: message.clone(),
                    });
                }
                PushMessage::Completed { result, .. } => {
                    let _ = self.on_work_completed(result.clone());
                }
            }
        }
        PushAck {
            accepted: batch.len(),
        }
    }

    /// Number of queued units.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of running units.
    #[must_use]
    pub fn running_size(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Uuids of running units.
    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        self.state.lock().running.keys().cloned().collect()
    }

    /// True when nothing is queued and every polled unit has reported completion.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.state.lock().is_drained()
    }

    /// Wait until [`is_drained`](Self::is_drained) holds.
    pub async fn wait_until_drained(&self) {
        let mut rx = self.drained.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|drained| *drained).await;
    }

    /// Subscribe to scheduler notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    fn refresh_drained(&self, state: &SchedulerState) {
        let drained = state.is_drained();
        self.drained.send_if_modified(|current| {
            let changed = *current != drained;
            *current = drained;
            changed
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn audit(&self, uuid: &str, pool: &str, action: AuditAction, payload: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.lock().record(build_audit_event(uuid, pool, action, payload));
        }
    }
}

impl std::fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QueueScheduler")
            .field("queued", &state.queue.len())
            .field("running", &state.running.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SchedulerApi for QueueScheduler {
    async fn poll_for_work(&self, pool_id: &str) -> Result<Option<WorkDescriptor>, SchedulerError> {
        Ok(Self::poll_for_work(self, pool_id))
    }

    async fn push(&self, pool_id: &str, batch: &[PushMessage]) -> Result<PushAck, SchedulerError> {
        Ok(Self::push(self, pool_id, batch))
    }
}
