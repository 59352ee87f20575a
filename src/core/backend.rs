//! Contracts between worker pools and the execution backends they launch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BackendKind;
use crate::core::{SchedulerError, WorkDescriptor, WorkLogger};

/// Where a newly launched slot should listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAddress {
    /// Port assigned to the slot.
    pub port: u16,
    /// API path the slot serves its control surface on.
    pub api_path: String,
}

/// Control surface of one running execution slot.
#[async_trait]
pub trait WorkerBackend: Send + Sync + 'static {
    /// Run one unit of work to completion.
    ///
    /// Log lines go through `log`; an `Err` becomes the unit's exception.
    async fn run(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String>;

    /// Ask the slot to stop the unit it is running. The pending `run` still resolves.
    ///
    /// Backends either scope this to the run in progress, staying usable afterwards and
    /// ignoring a terminate with nothing running, or end the worker behind the slot so every
    /// later `run` fails. Only the first kind may be handed out again by a
    /// [`CapacityProvider`](crate::core::CapacityProvider).
    async fn terminate(&self);
}

/// Creates and destroys execution slots of one kind.
#[async_trait]
pub trait BackendLauncher: Send + Sync + 'static {
    /// Kind of slot this launcher produces.
    fn kind(&self) -> BackendKind;

    /// Launch a slot. The pool treats the returned handle as opaque.
    async fn create(&self, address: SlotAddress) -> Result<Arc<dyn WorkerBackend>, SchedulerError>;

    /// Tear a slot down.
    async fn destroy(&self, backend: Arc<dyn WorkerBackend>);
}
