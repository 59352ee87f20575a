//! Clock, identifier and tracing helpers shared across the crate.

pub mod clock;
pub mod ids;
pub mod telemetry;

pub use clock::{log_timestamp, now_ms};
pub use ids::new_work_id;
pub use telemetry::{init_tracing, init_tracing_with, DEFAULT_FILTER};
