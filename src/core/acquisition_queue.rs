//! FIFO queue of acquire requests against a capacity-limited provider.
//!
//! Used where creating a resource is slow and bounded by an external limit (e.g. a fixed set
//! of headless-browser containers). Blocking on the provider directly gives no per-caller
//! timeout under contention; here every request carries an absolute expiry and is rejected by
//! the next dequeue pass once it passes, so each caller learns promptly whether it timed out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::AcquisitionQueueConfig;
use crate::core::SchedulerError;

/// Source of scarce resources with an external capacity limit.
#[async_trait]
pub trait CapacityProvider: Send + Sync + 'static {
    /// Resource handed to callers.
    type Resource: Send + 'static;

    /// Whether `provide` can be called now without exceeding capacity.
    fn has_capacity(&self) -> bool;

    /// Produce one resource, consuming one unit of capacity.
    async fn provide(&self) -> Result<Self::Resource, SchedulerError>;

    /// Give a resource back, restoring its unit of capacity.
    async fn reclaim(&self, resource: Self::Resource);
}

struct PendingRequest<R> {
    expires_at: Instant,
    tx: oneshot::Sender<Result<R, SchedulerError>>,
}

/// FIFO of pending acquire requests with per-request expiry and periodic redrive.
pub struct AcquisitionQueue<P: CapacityProvider> {
    config: AcquisitionQueueConfig,
    provider: Arc<P>,
    pending: Mutex<VecDeque<PendingRequest<P::Resource>>>,
    /// Held for the whole of a dequeue pass; at most one pass runs at a time.
    pass: tokio::sync::Mutex<()>,
    redrive_scheduled: AtomicBool,
}

impl<P: CapacityProvider> AcquisitionQueue<P> {
    /// Create a queue in front of `provider`.
    pub fn new(config: AcquisitionQueueConfig, provider: P) -> Self {
        Self {
            config,
            provider: Arc::new(provider),
            pending: Mutex::new(VecDeque::new()),
            pass: tokio::sync::Mutex::new(()),
            redrive_scheduled: AtomicBool::new(false),
        }
    }

    /// The provider behind the queue.
    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Requests waiting for capacity.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue a request and wait until it is fulfilled or expires.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AcquireTimeout` once `acquire_timeout` has passed
    /// - any error the provider returns while producing the resource
    pub async fn acquire(self: &Arc<Self>) -> Result<P::Resource, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let expires_at = Instant::now() + self.config.acquire_timeout();
        self.pending
            .lock()
            .push_back(PendingRequest { expires_at, tx });

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.dequeue_pass().await });

        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Give a resource back to the provider and serve waiting requests.
    pub async fn release(self: &Arc<Self>, resource: P::Resource) {
        self.provider.reclaim(resource).await;
        if self.pending_len() > 0 {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.dequeue_pass().await });
        }
    }

    async fn dequeue_pass(self: Arc<Self>) {
        if let Ok(_guard) = self.pass.try_lock() {
            self.reject_expired();
            while self.provider.has_capacity() {
                let Some(request) = self.next_live() else { break };
                match self.provider.provide().await {
                    Ok(resource) => {
                        if let Err(Ok(resource)) = request.tx.send(Ok(resource)) {
                            debug!("acquire caller went away, reclaiming resource");
                            self.provider.reclaim(resource).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "provider failed to produce a resource");
                        let _ = request.tx.send(Err(e));
                    }
                }
            }
        } else {
            debug!("dequeue pass already in flight");
        }

        if self.pending_len() > 0 {
            self.schedule_redrive();
        }
    }

    fn schedule_redrive(self: &Arc<Self>) {
        if self.redrive_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let queue = Arc::clone(self);
        let delay: Duration = self.config.redrive_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.redrive_scheduled.store(false, Ordering::Release);
            queue.dequeue_pass().await;
        });
    }

    fn reject_expired(&self) {
        let now = Instant::now();
        let timeout = self.config.acquire_timeout();
        let mut pending = self.pending.lock();
        let before = pending.len();
        let mut kept = VecDeque::with_capacity(before);
        for request in pending.drain(..) {
            if now >= request.expires_at {
                let _ = request.tx.send(Err(SchedulerError::AcquireTimeout(timeout)));
            } else if !request.tx.is_closed() {
                kept.push_back(request);
            }
        }
        *pending = kept;
        let rejected = before - pending.len();
        if rejected > 0 {
            warn!(rejected, remaining = pending.len(), "acquire requests expired");
        }
    }

    fn next_live(&self) -> Option<PendingRequest<P::Resource>> {
        let mut pending = self.pending.lock();
        while let Some(request) = pending.pop_front() {
            if !request.tx.is_closed() {
                return Some(request);
            }
        }
        None
    }
}
