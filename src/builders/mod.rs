//! Construction helpers from configuration.

pub mod pool_builder;

pub use pool_builder::{build_scheduler, build_worker_pools};
