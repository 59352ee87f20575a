//! Generic bounded pool of reusable resources.
//!
//! The pool owns a [`ResourceFactory`] and keeps between `min_size` and `max_size` resources
//! alive. A background maintenance task tops the pool up toward `min_size` and trims idle,
//! available resources above it. Callers borrow resources through [`Lease`]s; a leased
//! resource is never destroyed by anyone but its lease holder or a full shutdown.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ResourcePoolConfig;
use crate::core::SchedulerError;

/// Identifier of one pooled resource, unique within its pool.
pub type ResourceId = u64;

/// Creates and destroys the resources held by a [`ResourcePool`].
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// Pooled resource type.
    type Resource: Send + Sync + 'static;

    /// Create a new resource. May be slow (process spawn, container start).
    async fn create(&self) -> Result<Self::Resource, SchedulerError>;

    /// Tear a resource down. Called exactly once per created resource.
    async fn destroy(&self, resource: Arc<Self::Resource>);
}

/// Whether a pooled resource can be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Idle in the pool.
    Available,
    /// Leased to a caller.
    Unavailable,
}

/// Exclusive borrow of a pooled resource, returned through `release` or `retire`.
#[derive(Debug)]
pub struct Lease<R> {
    id: ResourceId,
    resource: Arc<R>,
}

impl<R> Lease<R> {
    /// Identifier of the leased resource.
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// The leased resource.
    #[must_use]
    pub const fn resource(&self) -> &Arc<R> {
        &self.resource
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcePoolStats {
    /// Resources alive in the pool.
    pub size: usize,
    /// Resources idle and ready to lease.
    pub available: usize,
    /// Resources currently leased.
    pub in_use: usize,
    /// Resources being created right now.
    pub creating: usize,
}

struct Entry<R> {
    id: ResourceId,
    resource: Arc<R>,
    availability: Availability,
    idle_since: Instant,
}

struct PoolState<R> {
    entries: Vec<Entry<R>>,
    /// Creations in flight; they count against `max_size`.
    creating: usize,
    started: bool,
    shut_down: bool,
    next_id: ResourceId,
}

impl<R> PoolState<R> {
    fn has_room(&self, max_size: usize) -> bool {
        self.entries.len() + self.creating < max_size
    }

    fn available(&self, max_size: usize) -> bool {
        self.started
            && !self.shut_down
            && (self.has_room(max_size)
                || self
                    .entries
                    .iter()
                    .any(|e| e.availability == Availability::Available))
    }
}

enum Reservation<R> {
    Existing(Lease<R>),
    Create,
    Exhausted,
}

/// Bounded pool of reusable resources with min/max sizing and idle trimming.
pub struct ResourcePool<F: ResourceFactory> {
    name: String,
    config: ResourcePoolConfig,
    factory: Arc<F>,
    state: Mutex<PoolState<F::Resource>>,
    availability: watch::Sender<bool>,
    cancel: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a stopped pool. Call [`startup`](Self::startup) before acquiring.
    pub fn new(name: impl Into<String>, config: ResourcePoolConfig, factory: F) -> Self {
        let (availability, _) = watch::channel(false);
        Self {
            name: name.into(),
            config,
            factory: Arc::new(factory),
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                creating: 0,
                started: false,
                shut_down: false,
                next_id: 0,
            }),
            availability,
            cancel: CancellationToken::new(),
            maintenance: Mutex::new(None),
        }
    }

    /// The factory backing this pool.
    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Start the pool: fill it to `min_size` and begin periodic topup/trim.
    ///
    /// # Errors
    ///
    /// `SchedulerError::ShutDown` if the pool was already shut down.
    pub async fn startup(self: &Arc<Self>) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }
            if state.started {
                debug!(pool = %self.name, "resource pool already started");
                return Ok(());
            }
            state.started = true;
            self.refresh_availability(&state);
        }

        self.maintain().await;

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.config.maintenance_interval();
        let handle = tokio::spawn(maintenance_loop(weak, cancel, interval));
        *self.maintenance.lock() = Some(handle);

        info!(
            pool = %self.name,
            min_size = self.config.min_size,
            max_size = self.config.max_size,
            "resource pool started"
        );
        Ok(())
    }

    /// Stop maintenance and destroy every resource, leased or not.
    pub async fn shutdown(&self) {
        let entries = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            let entries = std::mem::take(&mut state.entries);
            self.refresh_availability(&state);
            entries
        };

        self.cancel.cancel();
        let handle = self.maintenance.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(pool = %self.name, error = %e, "maintenance task ended abnormally");
            }
        }

        let count = entries.len();
        for entry in entries {
            if entry.availability == Availability::Unavailable {
                debug!(pool = %self.name, id = entry.id, "destroying leased resource on shutdown");
            }
            self.factory.destroy(entry.resource).await;
        }
        info!(pool = %self.name, destroyed = count, "resource pool shut down");
    }

    /// Lease a resource.
    ///
    /// Returns an available resource if there is one, otherwise creates one while the pool is
    /// below `max_size`, otherwise polls every `poll_interval` until a resource is released or
    /// `acquire_timeout` elapses.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NotStarted` if `startup` was never called
    /// - `SchedulerError::ShutDown` if the pool is shut down
    /// - `SchedulerError::AcquireTimeout` if nothing became available in time
    /// - any error returned by the factory while creating
    pub async fn acquire(&self) -> Result<Lease<F::Resource>, SchedulerError> {
        let timeout = self.config.acquire_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            match self.try_reserve()? {
                Reservation::Existing(lease) => {
                    debug!(pool = %self.name, id = lease.id, "leased existing resource");
                    return Ok(lease);
                }
                Reservation::Create => {
                    let (id, resource) = self.create_reserved(Availability::Unavailable).await?;
                    debug!(pool = %self.name, id, "leased new resource");
                    return Ok(Lease { id, resource });
                }
                Reservation::Exhausted => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(pool = %self.name, ?timeout, "resource acquire timed out");
                return Err(SchedulerError::AcquireTimeout(timeout));
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Return a leased resource to the pool.
    pub fn release(&self, lease: Lease<F::Resource>) {
        let mut state = self.state.lock();
        match state.entries.iter_mut().find(|e| e.id == lease.id) {
            Some(entry) => {
                entry.availability = Availability::Available;
                entry.idle_since = Instant::now();
                debug!(pool = %self.name, id = lease.id, "resource released");
            }
            None => debug!(pool = %self.name, id = lease.id, "released resource no longer pooled"),
        }
        self.refresh_availability(&state);
    }

    /// Remove a leased resource from the pool and destroy it.
    ///
    /// Used by the lease holder when the resource is no longer fit for reuse.
    pub async fn retire(&self, lease: Lease<F::Resource>) {
        let removed = {
            let mut state = self.state.lock();
            let position = state.entries.iter().position(|e| e.id == lease.id);
            let removed = position.map(|idx| state.entries.remove(idx));
            self.refresh_availability(&state);
            removed
        };
        if let Some(entry) = removed {
            debug!(pool = %self.name, id = entry.id, "retiring resource");
            self.factory.destroy(entry.resource).await;
        }
    }

    /// Destroy an available resource.
    ///
    /// Resources in use are never force-destroyed: if `id` is currently leased this is a
    /// no-op that logs a warning and returns `false`.
    pub async fn destroy_resource(&self, id: ResourceId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let Some(idx) = state.entries.iter().position(|e| e.id == id) else {
                return false;
            };
            if state.entries[idx].availability == Availability::Unavailable {
                warn!(pool = %self.name, id, "refusing to destroy a resource that is in use");
                return false;
            }
            let entry = state.entries.remove(idx);
            self.refresh_availability(&state);
            entry
        };
        self.factory.destroy(removed.resource).await;
        true
    }

    /// Whether an acquire could succeed right now without waiting.
    #[must_use]
    pub fn available(&self) -> bool {
        self.state.lock().available(self.config.max_size)
    }

    /// Watch the availability predicate; the value flips as resources come and go.
    #[must_use]
    pub fn subscribe_availability(&self) -> watch::Receiver<bool> {
        self.availability.subscribe()
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> ResourcePoolStats {
        let state = self.state.lock();
        let available = state
            .entries
            .iter()
            .filter(|e| e.availability == Availability::Available)
            .count();
        ResourcePoolStats {
            size: state.entries.len(),
            available,
            in_use: state.entries.len() - available,
            creating: state.creating,
        }
    }

    /// Leased resources, for callers that need to reach every active one (e.g. to kill work).
    #[must_use]
    pub fn leased(&self) -> Vec<Arc<F::Resource>> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.availability == Availability::Unavailable)
            .map(|e| Arc::clone(&e.resource))
            .collect()
    }

    fn try_reserve(&self) -> Result<Reservation<F::Resource>, SchedulerError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }
        if !state.started {
            return Err(SchedulerError::NotStarted);
        }

        let reservation = if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.availability == Availability::Available)
        {
            entry.availability = Availability::Unavailable;
            Reservation::Existing(Lease {
                id: entry.id,
                resource: Arc::clone(&entry.resource),
            })
        } else if state.has_room(self.config.max_size) {
            state.creating += 1;
            Reservation::Create
        } else {
            Reservation::Exhausted
        };
        self.refresh_availability(&state);
        Ok(reservation)
    }

    /// Create a resource for a slot already counted in `creating`.
    ///
    /// Cancel safe: dropping the future mid-creation gives the reserved slot back.
    async fn create_reserved(
        &self,
        availability: Availability,
    ) -> Result<(ResourceId, Arc<F::Resource>), SchedulerError> {
        let mut reserved = CreationSlot {
            pool: self,
            held: true,
        };
        let created = self.factory.create().await;

        let placed = {
            let mut state = self.state.lock();
            state.creating -= 1;
            reserved.held = false;
            let resource = match created {
                Ok(resource) => Arc::new(resource),
                Err(e) => {
                    self.refresh_availability(&state);
                    warn!(pool = %self.name, error = %e, "resource creation failed");
                    return Err(e);
                }
            };
            if state.shut_down {
                Err(resource)
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.entries.push(Entry {
                    id,
                    resource: Arc::clone(&resource),
                    availability,
                    idle_since: Instant::now(),
                });
                self.refresh_availability(&state);
                Ok((id, resource))
            }
        };

        match placed {
            Ok(pooled) => Ok(pooled),
            Err(orphan) => {
                self.factory.destroy(orphan).await;
                Err(SchedulerError::ShutDown)
            }
        }
    }

    /// One topup/trim pass.
    async fn maintain(&self) {
        // Top up toward min_size.
        loop {
            {
                let mut state = self.state.lock();
                if !state.started
                    || state.shut_down
                    || state.entries.len() + state.creating >= self.config.min_size
                {
                    break;
                }
                state.creating += 1;
            }
            if let Err(e) = self.create_reserved(Availability::Available).await {
                debug!(pool = %self.name, error = %e, "topup stopped");
                break;
            }
        }

        // Trim idle, available resources above min_size.
        let idle_timeout = self.config.idle_timeout();
        let trimmed: Vec<Entry<F::Resource>> = {
            let mut state = self.state.lock();
            let mut excess = state.entries.len().saturating_sub(self.config.min_size);
            let mut trimmed = Vec::new();
            let mut idx = 0;
            while excess > 0 && idx < state.entries.len() {
                let entry = &state.entries[idx];
                if entry.availability == Availability::Available
                    && entry.idle_since.elapsed() >= idle_timeout
                {
                    trimmed.push(state.entries.remove(idx));
                    excess -= 1;
                } else {
                    idx += 1;
                }
            }
            if !trimmed.is_empty() {
                self.refresh_availability(&state);
            }
            trimmed
        };
        for entry in trimmed {
            debug!(pool = %self.name, id = entry.id, "trimming idle resource");
            self.factory.destroy(entry.resource).await;
        }
    }

    fn refresh_availability(&self, state: &PoolState<F::Resource>) {
        let now = state.available(self.config.max_size);
        self.availability.send_if_modified(|current| {
            if *current == now {
                return false;
            }
            *current = now;
            if now {
                debug!(pool = %self.name, "resource pool became available");
            } else {
                debug!(pool = %self.name, "resource pool became unavailable");
            }
            true
        });
    }
}

/// One unit of `creating` owned by an in-flight creation.
struct CreationSlot<'a, F: ResourceFactory> {
    pool: &'a ResourcePool<F>,
    held: bool,
}

impl<F: ResourceFactory> Drop for CreationSlot<'_, F> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let mut state = self.pool.state.lock();
        state.creating -= 1;
        self.pool.refresh_availability(&state);
        debug!(pool = %self.pool.name, "resource creation cancelled");
    }
}

async fn maintenance_loop<F: ResourceFactory>(
    pool: Weak<ResourcePool<F>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        let Some(pool) = pool.upgrade() else { break };
        pool.maintain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    #[async_trait]
    impl ResourceFactory for CountingFactory {
        type Resource = usize;

        async fn create(&self) -> Result<usize, SchedulerError> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn destroy(&self, _resource: Arc<usize>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(min: usize, max: usize) -> ResourcePoolConfig {
        ResourcePoolConfig::new()
            .with_min_size(min)
            .with_max_size(max)
            .with_acquire_timeout_ms(200)
            .with_poll_interval_ms(10)
            .with_maintenance_interval_ms(20)
    }

    #[tokio::test]
    async fn test_acquire_before_startup_fails() {
        let pool = ResourcePool::new("test", config(0, 1), CountingFactory::default());
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, SchedulerError::NotStarted));
    }

    #[tokio::test]
    async fn test_startup_tops_up_to_min() {
        let pool = Arc::new(ResourcePool::new("test", config(2, 4), CountingFactory::default()));
        pool.startup().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.available, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_resource() {
        let pool = Arc::new(ResourcePool::new("test", config(0, 2), CountingFactory::default()));
        pool.startup().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        let first = **lease.resource();
        pool.release(lease);
        let lease = pool.acquire().await.unwrap();
        assert_eq!(**lease.resource(), first);
        assert_eq!(pool.factory().created.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_destroy_in_use_resource_is_noop() {
        let pool = Arc::new(ResourcePool::new("test", config(0, 1), CountingFactory::default()));
        pool.startup().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        assert!(!pool.destroy_resource(lease.id()).await);
        assert_eq!(pool.stats().size, 1);

        let id = lease.id();
        pool.release(lease);
        assert!(pool.destroy_resource(id).await);
        assert_eq!(pool.stats().size, 0);
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_availability_tracks_capacity() {
        let pool = Arc::new(ResourcePool::new("test", config(0, 1), CountingFactory::default()));
        assert!(!pool.available());
        pool.startup().await.unwrap();
        assert!(pool.available());

        let lease = pool.acquire().await.unwrap();
        assert!(!pool.available());
        assert!(!*pool.subscribe_availability().borrow());

        pool.release(lease);
        assert!(pool.available());
        pool.shutdown().await;
        assert!(!pool.available());
    }

    #[tokio::test]
    async fn test_trim_idle_above_min() {
        let pool = Arc::new(ResourcePool::new(
            "test",
            config(1, 3).with_idle_timeout_ms(0),
            CountingFactory::default(),
        ));
        pool.startup().await.unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().size, 3);
        pool.release(a);
        pool.release(b);
        pool.release(c);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().size, 1);
        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_destroys_leased_resources() {
        let pool = Arc::new(ResourcePool::new("test", config(0, 2), CountingFactory::default()));
        pool.startup().await.unwrap();

        let leased = pool.acquire().await.unwrap();
        let idle = pool.acquire().await.unwrap();
        pool.release(idle);
        pool.shutdown().await;

        assert_eq!(pool.factory().destroyed.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.acquire().await, Err(SchedulerError::ShutDown)));
        pool.release(leased);
        assert_eq!(pool.stats().size, 0);
    }
}
