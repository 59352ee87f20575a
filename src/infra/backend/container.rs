//! Slots drawn from a fixed-capacity set of containers.
//!
//! Container start-up is slow and bounded by the host, so slot creation goes through an
//! [`AcquisitionQueue`]: each create call waits its turn for provider capacity and fails with
//! an acquisition timeout if none frees up in time.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{AcquisitionQueueConfig, BackendKind};
use crate::core::{
    AcquisitionQueue, BackendLauncher, CapacityProvider, SchedulerError, SlotAddress,
    WorkerBackend,
};

/// Launcher handing out containers from `P` through an acquisition queue.
pub struct ContainerLauncher<P>
where
    P: CapacityProvider<Resource = Arc<dyn WorkerBackend>>,
{
    queue: Arc<AcquisitionQueue<P>>,
}

impl<P> ContainerLauncher<P>
where
    P: CapacityProvider<Resource = Arc<dyn WorkerBackend>>,
{
    /// Launcher in front of `provider`.
    pub fn new(config: AcquisitionQueueConfig, provider: P) -> Self {
        Self {
            queue: Arc::new(AcquisitionQueue::new(config, provider)),
        }
    }

    /// The acquisition queue slot creation goes through.
    #[must_use]
    pub const fn queue(&self) -> &Arc<AcquisitionQueue<P>> {
        &self.queue
    }
}

#[async_trait]
impl<P> BackendLauncher for ContainerLauncher<P>
where
    P: CapacityProvider<Resource = Arc<dyn WorkerBackend>>,
{
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn create(&self, address: SlotAddress) -> Result<Arc<dyn WorkerBackend>, SchedulerError> {
        let backend = self.queue.acquire().await?;
        debug!(port = address.port, "container assigned to slot");
        Ok(backend)
    }

    async fn destroy(&self, backend: Arc<dyn WorkerBackend>) {
        self.queue.release(backend).await;
    }
}

/// Capacity provider over a fixed set of already running containers.
pub struct FixedContainerPool {
    idle: Mutex<Vec<Arc<dyn WorkerBackend>>>,
    capacity: usize,
}

impl FixedContainerPool {
    /// Pool over `containers`.
    pub fn new(containers: Vec<Arc<dyn WorkerBackend>>) -> Self {
        info!(capacity = containers.len(), "container pool ready");
        Self {
            capacity: containers.len(),
            idle: Mutex::new(containers),
        }
    }

    /// Total containers managed.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Containers not currently handed out.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

#[async_trait]
impl CapacityProvider for FixedContainerPool {
    type Resource = Arc<dyn WorkerBackend>;

    fn has_capacity(&self) -> bool {
        !self.idle.lock().is_empty()
    }

    async fn provide(&self) -> Result<Arc<dyn WorkerBackend>, SchedulerError> {
        self.idle
            .lock()
            .pop()
            .ok_or_else(|| SchedulerError::Backend("no idle container".into()))
    }

    async fn reclaim(&self, container: Arc<dyn WorkerBackend>) {
        // Stops a run the previous slot left behind. Reuse relies on run-scoped terminate.
        container.terminate().await;
        self.idle.lock().push(container);
    }
}
