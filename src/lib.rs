//! # Prometheus Work Scheduler
//!
//! A distributed work scheduling and pooled execution engine.
//!
//! A central [`QueueScheduler`](core::QueueScheduler) hands out units of work to one or more
//! [`WorkerPool`](core::WorkerPool)s. Each pool keeps a bounded set of execution backends
//! (in-process, child process, or container) in a [`ResourcePool`](core::ResourcePool), tracks
//! every in-flight unit through a [`WorkerTracker`](core::WorkerTracker) state machine, and
//! reports logs and completions back to the scheduler in time-ordered batches.
//!
//! ## Core Problem Solved
//!
//! Work units are expensive and the backends that run them are scarce:
//!
//! - **Bounded execution**: a pool never runs more backends than its `max_size`
//! - **Lossless reporting**: logs and completions are buffered locally and retried, so a
//!   scheduler outage delays telemetry but never drops it
//! - **Explicit timeouts**: scarce resources (e.g. browser containers) are acquired through an
//!   [`AcquisitionQueue`](core::AcquisitionQueue) that tells every caller promptly whether it
//!   timed out or succeeded
//! - **Durable history**: completed work is archived under a per-day rotating directory
//!
//! ## Data flow
//!
//! ```text
//! push_work ──► QueueScheduler ──poll_for_work──► WorkerPool ──acquire──► ResourcePool
//!                    ▲                                 │                       │
//!                    │                                 ▼                       ▼
//!                    └────────── push(batch) ◄──── PushBuffer ◄──── WorkerTracker ──► backend
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_work_scheduler::config::{SchedulerConfig, WorkerPoolConfig};
//! use prometheus_work_scheduler::core::{QueueScheduler, WorkDescriptor, WorkRegistry, WorkerPool};
//! use prometheus_work_scheduler::infra::backend::InProcessLauncher;
//!
//! let mut registry = WorkRegistry::new();
//! registry.register("render", RenderHandler);
//! let registry = Arc::new(registry);
//!
//! let scheduler = Arc::new(QueueScheduler::new(&SchedulerConfig::default())?);
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new("render-pool"),
//!     InProcessLauncher::from_shared(registry),
//!     scheduler.clone(),
//! )?;
//! pool.startup().await?;
//!
//! let handle = scheduler.push_work(WorkDescriptor::new("render"))?;
//! let result = handle.wait().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, pooling and tracking abstractions.
pub mod core;
/// Configuration models for the scheduler, pools and timeouts.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for execution backends and archival storage.
pub mod infra;
/// Transport-facing request/response models.
pub mod runtime;
/// Shared utilities.
pub mod util;
