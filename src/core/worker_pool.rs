//! Worker pool: pulls work from the scheduler and runs it on pooled backend slots.
//!
//! A `WorkerPool` owns a [`ResourcePool`] of [`Slot`]s and two independent timed loops:
//!
//! - **Poll loop**: runs only while the slot pool reports availability. Each tick polls the
//!   scheduler, acquires a slot, and starts the unit on the slot's tracker. Poll failures are
//!   logged and retried on the next tick.
//! - **Push loop**: each tick takes up to `max_push_messages` of the oldest buffered log and
//!   completion messages and sends them to the scheduler. A failed send puts the batch back
//!   at the front of the buffer, so connectivity loss delays telemetry but never drops it.
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = Arc::new(QueueScheduler::new(&SchedulerConfig::default())?);
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new("render"),
//!     InProcessLauncher::new(registry),
//!     scheduler.clone(),
//! )?;
//! pool.startup().await?;
//! let handle = scheduler.push_work(WorkDescriptor::new("render"))?;
//! let result = handle.wait().await?;
//! pool.shutdown(Some(Duration::from_secs(5))).await;
//! ```

mod push_buffer;
mod slots;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use push_buffer::PushBuffer;
pub use slots::{Slot, SlotFactory};

use crate::config::WorkerPoolConfig;
use crate::core::resource_pool::{Lease, ResourcePoolStats};
use crate::core::{
    BackendLauncher, PushMessage, ResourcePool, SchedulerApi, SchedulerError, TrackerStatus,
    WorkDescriptor, WorkResponse, WorkResult, WorkResultData, WorkStatus,
};

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool identifier.
    pub pool_id: String,
    /// Slots currently launched.
    pub slots: usize,
    /// Slots idle in the pool.
    pub idle_slots: usize,
    /// Units polled but not yet reported complete to the push buffer.
    pub in_flight: usize,
    /// Units received from the scheduler.
    pub polled: u64,
    /// Units that finished without an exception.
    pub completed: u64,
    /// Units that finished with an exception (including unassignable ones).
    pub failed: u64,
    /// Poll attempts that failed in transport.
    pub poll_failures: u64,
    /// Push attempts that failed and were requeued.
    pub push_failures: u64,
    /// Messages waiting in the push buffer.
    pub buffered: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    polled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    poll_failures: AtomicU64,
    push_failures: AtomicU64,
}

/// Pulls work from a scheduler and runs it on backends launched by `L`.
pub struct WorkerPool<L: BackendLauncher> {
    config: WorkerPoolConfig,
    scheduler: Arc<dyn SchedulerApi>,
    slots: Arc<ResourcePool<SlotFactory<L>>>,
    buffer: PushBuffer,
    counters: PoolCounters,
    in_flight: watch::Sender<usize>,
    poll_cancel: CancellationToken,
    /// Abandons a slot acquire still pending when a forced shutdown begins.
    force_cancel: CancellationToken,
    push_cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    push_task: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl<L: BackendLauncher> WorkerPool<L> {
    /// Create a stopped pool. Call [`startup`](Self::startup) to begin polling.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Backend` if the configuration is invalid or names a different backend
    /// kind than `launcher` produces.
    pub fn new(
        config: WorkerPoolConfig,
        launcher: L,
        scheduler: Arc<dyn SchedulerApi>,
    ) -> Result<Arc<Self>, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;
        if launcher.kind() != config.backend {
            return Err(SchedulerError::Backend(format!(
                "pool {} is configured for {} slots but the launcher produces {}",
                config.pool_id,
                config.backend,
                launcher.kind()
            )));
        }

        let buffer = PushBuffer::new();
        let factory = SlotFactory::new(
            config.pool_id.clone(),
            Arc::new(launcher),
            config.base_port,
            config.api_path.clone(),
            buffer.clone(),
        );
        let slots = Arc::new(ResourcePool::new(
            config.pool_id.clone(),
            config.slots.clone(),
            factory,
        ));
        let (in_flight, _) = watch::channel(0);

        Ok(Arc::new(Self {
            config,
            scheduler,
            slots,
            buffer,
            counters: PoolCounters::default(),
            in_flight,
            poll_cancel: CancellationToken::new(),
            force_cancel: CancellationToken::new(),
            push_cancel: CancellationToken::new(),
            poll_task: Mutex::new(None),
            push_task: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Pool identifier.
    #[must_use]
    pub fn pool_id(&self) -> &str {
        &self.config.pool_id
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// The slot pool.
    #[must_use]
    pub const fn slots(&self) -> &Arc<ResourcePool<SlotFactory<L>>> {
        &self.slots
    }

    /// Start the slot pool and both loops.
    ///
    /// # Errors
    ///
    /// Propagates slot pool startup failures (e.g. the pool was already shut down).
    pub async fn startup(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }
        self.slots.startup().await?;

        let weak = Arc::downgrade(self);
        let poll = tokio::spawn(poll_loop(
            weak.clone(),
            self.slots.subscribe_availability(),
            self.poll_cancel.clone(),
            self.config.poll_interval(),
        ));
        let push = tokio::spawn(push_loop(
            weak,
            self.push_cancel.clone(),
            self.config.push_interval(),
        ));
        *self.poll_task.lock() = Some(poll);
        *self.push_task.lock() = Some(push);

        info!(
            pool = %self.config.pool_id,
            backend = %self.config.backend,
            max_slots = self.config.slots.max_size,
            "worker pool started"
        );
        Ok(())
    }

    /// Stop polling, wait for in-flight work and the push buffer to drain, then tear down
    /// every slot.
    ///
    /// `force_after` bounds the wait; `None` waits indefinitely. When the bound is hit, a slot
    /// acquire still pending is abandoned (its unit completes as unassigned), running units
    /// are killed, and both get the same bound again to report. Whatever is buffered after the
    /// slots are torn down is flushed once more; anything the scheduler still refuses is
    /// logged at error.
    pub async fn shutdown(&self, force_after: Option<Duration>) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(pool = %self.config.pool_id, "shutting down worker pool");
        self.poll_cancel.cancel();
        let mut poll_task = self.poll_task.lock().take();

        if let Some(limit) = force_after {
            if tokio::time::timeout(limit, self.drain(&mut poll_task)).await.is_err() {
                self.force_drain(limit, poll_task.take()).await;
            }
        } else {
            self.drain(&mut poll_task).await;
        }

        self.push_cancel.cancel();
        let push_task = self.push_task.lock().take();
        if let Some(Err(e)) = join_task(push_task).await {
            warn!(pool = %self.config.pool_id, error = %e, "push loop ended abnormally");
        }
        self.slots.shutdown().await;
        self.final_flush(force_after).await;
        info!(pool = %self.config.pool_id, "worker pool shut down");
    }

    /// [`shutdown`](Self::shutdown) bounded by the configured `shutdown_force_after_ms`.
    pub async fn shutdown_with_config(&self) {
        self.shutdown(self.config.shutdown_force_after()).await;
    }

    /// Ask every running unit to terminate. Their completions still flow through the buffer.
    pub async fn kill_all(&self) {
        for slot in self.slots.leased() {
            slot.tracker().kill_work().await;
        }
    }

    /// Snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let ResourcePoolStats {
            size, available, ..
        } = self.slots.stats();
        PoolStats {
            pool_id: self.config.pool_id.clone(),
            slots: size,
            idle_slots: available,
            in_flight: *self.in_flight.borrow(),
            polled: self.counters.polled.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            poll_failures: self.counters.poll_failures.load(Ordering::Relaxed),
            push_failures: self.counters.push_failures.load(Ordering::Relaxed),
            buffered: self.buffer.len(),
        }
    }

    async fn drain(&self, poll_task: &mut Option<JoinHandle<()>>) {
        // A poll already in flight may still hand over one more unit.
        if let Some(task) = poll_task.as_mut() {
            if let Err(e) = task.await {
                warn!(pool = %self.config.pool_id, error = %e, "poll loop ended abnormally");
            }
            *poll_task = None;
        }
        self.wait_idle(None).await;
        while !self.buffer.is_empty() {
            tokio::time::sleep(self.config.push_interval()).await;
        }
    }

    /// Abandon a pending slot acquire and kill running units, then give the poll loop and
    /// every in-flight unit up to `grace` to report.
    async fn force_drain(&self, grace: Duration, poll_task: Option<JoinHandle<()>>) {
        warn!(
            pool = %self.config.pool_id,
            in_flight = *self.in_flight.borrow(),
            buffered = self.buffer.len(),
            "shutdown forced before drain"
        );
        self.force_cancel.cancel();
        self.kill_all().await;
        if let Some(task) = poll_task {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(pool = %self.config.pool_id, error = %e, "poll loop ended abnormally"),
                Err(_) => warn!(pool = %self.config.pool_id, "poll loop did not stop in time"),
            }
        }
        if !self.wait_idle(Some(grace)).await {
            warn!(pool = %self.config.pool_id, "killed work did not report in time");
        }
    }

    /// Wait until no polled unit is left without a buffered completion. Returns `false` if
    /// `bound` elapsed first.
    async fn wait_idle(&self, bound: Option<Duration>) -> bool {
        let mut in_flight = self.in_flight.subscribe();
        let idle = in_flight.wait_for(|n| *n == 0);
        match bound {
            Some(bound) => tokio::time::timeout(bound, idle).await.is_ok(),
            None => {
                let _ = idle.await;
                true
            }
        }
    }

    /// Deliver what slot teardown left in the buffer while the scheduler accepts it.
    async fn final_flush(&self, bound: Option<Duration>) {
        // Tearing slots down kills anything still running; its completion lands here.
        if !self.wait_idle(bound).await {
            error!(
                pool = %self.config.pool_id,
                in_flight = *self.in_flight.borrow(),
                "units still unreported after slot teardown"
            );
        }
        while !self.buffer.is_empty() && self.flush().await {}
        if !self.buffer.is_empty() {
            error!(
                pool = %self.config.pool_id,
                dropped = self.buffer.len(),
                "messages left undelivered at shutdown"
            );
        }
    }

    /// Poll until the scheduler has nothing or no slot can be had.
    async fn poll_tick(self: &Arc<Self>) {
        while self.slots.available() && !self.poll_cancel.is_cancelled() {
            let work = match self.scheduler.poll_for_work(&self.config.pool_id).await {
                Ok(Some(work)) => work,
                Ok(None) => return,
                Err(e) => {
                    self.counters.poll_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(pool = %self.config.pool_id, error = %e, "poll failed, retrying next tick");
                    return;
                }
            };
            self.counters.polled.fetch_add(1, Ordering::Relaxed);
            self.in_flight.send_modify(|n| *n += 1);

            let acquired = tokio::select! {
                acquired = self.slots.acquire() => acquired,
                () = self.force_cancel.cancelled() => Err(SchedulerError::ShutDown),
            };
            match acquired {
                Ok(lease) => self.assign(lease, work).await,
                Err(e) => {
                    warn!(pool = %self.config.pool_id, uuid = %work.uuid, error = %e, "no slot for polled work");
                    self.complete_unassigned(work, &e);
                }
            }
        }
    }

    async fn assign(self: &Arc<Self>, lease: Lease<Slot>, work: WorkDescriptor) {
        let tracker = Arc::clone(lease.resource().tracker());
        let work_dir = self.config.work_dir.join(&self.config.pool_id).join(&work.uuid);
        match tracker.run_work(work.clone(), &work_dir) {
            Ok(running) => {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    let status = match running.await {
                        Ok(status) => status,
                        Err(e) => {
                            error!(pool = %pool.config.pool_id, slot = %tracker.label(), error = %e, "work task aborted");
                            tracker.complete_work(WorkResponse::failed(format!("work task aborted: {e}")))
                        }
                    };
                    pool.finish(lease, status).await;
                });
            }
            Err(e) => {
                error!(pool = %self.config.pool_id, slot = %tracker.label(), error = %e, "could not start work on slot");
                self.complete_unassigned(work, &e);
                self.slots.retire(lease).await;
            }
        }
    }

    /// Hand the finished result to the push buffer and return the slot.
    async fn finish(&self, lease: Lease<Slot>, status: TrackerStatus) {
        let tracker = Arc::clone(lease.resource().tracker());
        match tracker.take_work_result() {
            Some(result) => {
                let data = result.serialize_for_scheduler();
                self.record_completion(data);
                if !self.config.keep_work_dirs {
                    if let Err(e) = tokio::fs::remove_dir_all(result.work_dir()).await {
                        debug!(pool = %self.config.pool_id, error = %e, "work dir cleanup failed");
                    }
                }
            }
            None => error!(pool = %self.config.pool_id, slot = %tracker.label(), "slot finished without a work result"),
        }

        if status == TrackerStatus::Stopped {
            match tracker.reuse() {
                Ok(()) => self.slots.release(lease),
                Err(e) => {
                    error!(pool = %self.config.pool_id, slot = %tracker.label(), error = %e, "slot not reusable");
                    self.slots.retire(lease).await;
                }
            }
        } else {
            debug!(pool = %self.config.pool_id, slot = %tracker.label(), %status, "retiring slot");
            self.slots.retire(lease).await;
        }
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Complete a unit that never reached a slot, so its caller still gets an answer.
    fn complete_unassigned(&self, work: WorkDescriptor, reason: &SchedulerError) {
        let message = format!("work could not be assigned: {reason}");
        let work_dir = self.config.work_dir.join(&self.config.pool_id).join(&work.uuid);
        let recorded = WorkResult::initialise(&work_dir, work.clone()).and_then(|mut result| {
            result.append_work_log(&message)?;
            result.close(WorkResponse::failed(message.clone()))?;
            Ok(result.serialize_for_scheduler())
        });
        if !self.config.keep_work_dirs {
            let _ = std::fs::remove_dir_all(&work_dir);
        }
        let data = recorded.unwrap_or_else(|e| {
            warn!(pool = %self.config.pool_id, error = %e, "failed to record unassigned work");
            let now = Utc::now();
            WorkResultData {
                descriptor: work,
                status: WorkStatus {
                    started: now,
                    completed: Some(now),
                    response: None,
                    exception: Some(message.clone()),
                },
                log: format!("{message}\n"),
            }
        });
        self.record_completion(data);
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn record_completion(&self, data: WorkResultData) {
        let counter = if data.response().is_failure() {
            &self.counters.failed
        } else {
            &self.counters.completed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.buffer.push(PushMessage::Completed {
            captured_at: Utc::now(),
            result: data,
        });
    }

    /// Send one batch. A failed batch goes back to the front of the buffer and `false` is
    /// returned.
    async fn flush(&self) -> bool {
        let batch = self.buffer.take_batch(self.config.max_push_messages);
        if batch.is_empty() {
            return true;
        }
        match self.scheduler.push(&self.config.pool_id, &batch).await {
            Ok(ack) => {
                debug!(pool = %self.config.pool_id, accepted = ack.accepted, "batch pushed");
                true
            }
            Err(e) => {
                self.counters.push_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    pool = %self.config.pool_id,
                    error = %e,
                    requeued = batch.len(),
                    "push failed, retrying next tick"
                );
                self.buffer.requeue_front(batch);
                false
            }
        }
    }
}

impl<L: BackendLauncher> Drop for WorkerPool<L> {
    fn drop(&mut self) {
        // Loops hold weak references only.
        self.poll_cancel.cancel();
        self.force_cancel.cancel();
        self.push_cancel.cancel();
        if !self.shutting_down.load(Ordering::Acquire) {
            debug!(pool = %self.config.pool_id, "worker pool dropped without explicit shutdown");
        }
    }
}

impl<L: BackendLauncher> std::fmt::Debug for WorkerPool<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.config.pool_id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn join_task(
    task: Option<JoinHandle<()>>,
) -> Option<Result<(), tokio::task::JoinError>> {
    match task {
        Some(task) => Some(task.await),
        None => None,
    }
}

async fn poll_loop<L: BackendLauncher>(
    pool: Weak<WorkerPool<L>>,
    mut availability: watch::Receiver<bool>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        if !*availability.borrow_and_update() {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = availability.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(pool) = pool.upgrade() else { break };
        pool.poll_tick().await;
    }
    debug!("poll loop stopped");
}

async fn push_loop<L: BackendLauncher>(
    pool: Weak<WorkerPool<L>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(pool) = pool.upgrade() else { break };
        pool.flush().await;
    }
    debug!("push loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();
        assert_eq!(stats.slots, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_pool_stats_serialize() {
        let stats = PoolStats {
            pool_id: "render".into(),
            polled: 3,
            failed: 1,
            ..PoolStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pool_id"], "render");
        assert_eq!(json["polled"], 3);
    }
}
