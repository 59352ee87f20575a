//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A descriptor with the same uuid is already queued or running.
    #[error("duplicate work: {0} is already queued or running")]
    DuplicateWork(String),
    /// No handler is registered for the requested work kind.
    #[error("unknown work kind: {0}")]
    UnknownWorkKind(String),
    /// A resource could not be obtained within the configured window.
    #[error("acquire timed out after {0:?}")]
    AcquireTimeout(Duration),
    /// The component was used before `startup()`.
    #[error("not started")]
    NotStarted,
    /// The component has been shut down.
    #[error("shut down")]
    ShutDown,
    /// A programming error: an operation was called in a state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The scheduler could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// The other side of a completion channel went away.
    #[error("channel closed")]
    Closed,
    /// File system failure while persisting work.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
