//! API surface for transports fronting the scheduler.

pub mod api;

pub use api::{health, snapshot, submit_work, Health, SchedulerSnapshot, SubmitWorkRequest};
