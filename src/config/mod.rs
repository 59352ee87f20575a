//! Configuration models for the scheduler, pools and timeouts.

pub mod pool;
pub mod scheduler;

pub use pool::{AcquisitionQueueConfig, BackendKind, ResourcePoolConfig, WorkerPoolConfig};
pub use scheduler::{SchedulerConfig, ServiceConfig, CONFIG_PATH_ENV};
