//! Core scheduling abstractions: descriptors, pools, trackers and the scheduler.

pub mod acquisition_queue;
pub mod audit;
pub mod backend;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod resource_pool;
pub mod scheduler;
pub mod tracker;
pub mod work_result;
pub mod worker_pool;

pub use acquisition_queue::{AcquisitionQueue, CapacityProvider};
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use backend::{BackendLauncher, SlotAddress, WorkerBackend};
pub use descriptor::{WorkDescriptor, WorkResponse};
pub use error::{AppResult, SchedulerError};
pub use executor::{LogLine, WorkHandler, WorkLogger, WorkRegistry};
pub use resource_pool::{Lease, ResourceFactory, ResourcePool, ResourcePoolStats};
pub use scheduler::{
    CompletionHandle, PushAck, PushMessage, QueueScheduler, SchedulerApi, SchedulerEvent,
};
pub use tracker::{TrackerStatus, WorkerTracker};
pub use work_result::{WorkResult, WorkResultData, WorkStatus};
pub use worker_pool::{PoolStats, PushBuffer, Slot, SlotFactory, WorkerPool};
