//! Work handlers, the kind registry, and the log channel handed to running work.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{SchedulerError, WorkDescriptor};

/// One log line captured from running work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Capture time, used to order batches sent to the scheduler.
    pub captured_at: DateTime<Utc>,
    /// Log text.
    pub message: String,
}

/// Sending half of a work unit's log stream.
///
/// Cheap to clone. Lines sent after the unit completed are dropped.
#[derive(Debug, Clone)]
pub struct WorkLogger {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl WorkLogger {
    /// Create a logger and the receiver that collects its lines.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Record one line, stamped with the current time.
    pub fn log(&self, message: impl Into<String>) {
        let line = LogLine {
            captured_at: Utc::now(),
            message: message.into(),
        };
        if self.tx.send(line).is_err() {
            tracing::trace!("log line dropped: work already completed");
        }
    }
}

/// Executable behavior behind one `work_kind`.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_work_scheduler::core::{WorkDescriptor, WorkHandler, WorkLogger};
///
/// struct Echo;
///
/// #[async_trait]
/// impl WorkHandler for Echo {
///     async fn execute(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String> {
///         log.log("echoing");
///         Ok(Value::Array(work.args.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    /// Run the work described by `work`.
    ///
    /// An `Err` becomes the exception of the unit's `WorkResponse`.
    async fn execute(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String>;
}

/// Table mapping `work_kind` identifiers to their handlers.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct WorkRegistry {
    handlers: HashMap<String, Arc<dyn WorkHandler>>,
}

impl WorkRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl WorkHandler) -> &mut Self {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(kind = %kind, "work handler replaced");
        }
        self
    }

    /// Resolve the handler for `kind`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::UnknownWorkKind` if nothing is registered under `kind`.
    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn WorkHandler>, SchedulerError> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownWorkKind(kind.to_string()))
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
