//! Pooled execution slots: one launched backend plus the tracker bound to it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::PushBuffer;
use crate::core::resource_pool::ResourceFactory;
use crate::core::{BackendLauncher, SchedulerError, SlotAddress, WorkerTracker};

/// A launched backend slot.
#[derive(Debug)]
pub struct Slot {
    port: u16,
    tracker: Arc<WorkerTracker>,
}

impl Slot {
    /// Port the slot was launched on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Tracker bound to the slot's backend.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<WorkerTracker> {
        &self.tracker
    }
}

/// Launches slots for a worker pool through its [`BackendLauncher`].
///
/// Ports are handed out from `base_port` upward, lowest free first.
pub struct SlotFactory<L: BackendLauncher> {
    pool_id: String,
    launcher: Arc<L>,
    base_port: u16,
    api_path: String,
    relay: PushBuffer,
    ports: Mutex<BTreeSet<u16>>,
}

impl<L: BackendLauncher> SlotFactory<L> {
    /// Factory whose trackers relay log lines into `relay`.
    pub fn new(
        pool_id: impl Into<String>,
        launcher: Arc<L>,
        base_port: u16,
        api_path: impl Into<String>,
        relay: PushBuffer,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            launcher,
            base_port,
            api_path: api_path.into(),
            relay,
            ports: Mutex::new(BTreeSet::new()),
        }
    }

    /// The launcher used for every slot.
    #[must_use]
    pub const fn launcher(&self) -> &Arc<L> {
        &self.launcher
    }

    fn allocate_port(&self) -> Result<u16, SchedulerError> {
        let mut ports = self.ports.lock();
        let port = (self.base_port..=u16::MAX)
            .find(|p| !ports.contains(p))
            .ok_or_else(|| SchedulerError::Backend(format!("no free port above {}", self.base_port)))?;
        ports.insert(port);
        Ok(port)
    }

    fn free_port(&self, port: u16) {
        self.ports.lock().remove(&port);
    }
}

#[async_trait]
impl<L: BackendLauncher> ResourceFactory for SlotFactory<L> {
    type Resource = Slot;

    async fn create(&self) -> Result<Slot, SchedulerError> {
        let port = self.allocate_port()?;
        let address = SlotAddress {
            port,
            api_path: self.api_path.clone(),
        };
        let backend = match self.launcher.create(address).await {
            Ok(backend) => backend,
            Err(e) => {
                self.free_port(port);
                return Err(e);
            }
        };
        let label = format!("{}:{port}", self.pool_id);
        info!(pool = %self.pool_id, slot = %label, kind = %self.launcher.kind(), "slot launched");
        Ok(Slot {
            port,
            tracker: Arc::new(WorkerTracker::new(label, backend).with_relay(self.relay.clone())),
        })
    }

    async fn destroy(&self, slot: Arc<Slot>) {
        slot.tracker.kill_work().await;
        self.launcher
            .destroy(Arc::clone(slot.tracker.backend()))
            .await;
        self.free_port(slot.port);
        debug!(pool = %self.pool_id, slot = %slot.tracker.label(), "slot destroyed");
    }
}
