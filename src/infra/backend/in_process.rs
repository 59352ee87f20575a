//! Slots that run registered handlers as tokio tasks inside this process.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::BackendKind;
use crate::core::{
    BackendLauncher, SchedulerError, SlotAddress, WorkDescriptor, WorkLogger, WorkRegistry,
    WorkerBackend,
};

/// Launches in-process slots backed by a shared [`WorkRegistry`].
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    registry: Arc<WorkRegistry>,
}

impl InProcessLauncher {
    /// Launcher resolving work kinds through `registry`.
    #[must_use]
    pub fn new(registry: WorkRegistry) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    /// Launcher sharing an existing registry.
    #[must_use]
    pub const fn from_shared(registry: Arc<WorkRegistry>) -> Self {
        Self { registry }
    }

    /// The registry slots resolve against.
    #[must_use]
    pub const fn registry(&self) -> &Arc<WorkRegistry> {
        &self.registry
    }
}

struct InProcessBackend {
    registry: Arc<WorkRegistry>,
    port: u16,
    /// Cancels the run in progress; replaced by every `run`.
    current: Mutex<Option<CancellationToken>>,
}

#[async_trait]
impl WorkerBackend for InProcessBackend {
    async fn run(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String> {
        let cancel = CancellationToken::new();
        *self.current.lock() = Some(cancel.clone());
        let handler = self.registry.resolve(&work.work_kind).map_err(|e| e.to_string())?;
        let work = work.clone();
        let log = log.clone();
        let mut task = tokio::spawn(async move { handler.execute(&work, &log).await });

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                task.abort();
                Err("terminated".to_string())
            }
            joined = &mut task => joined.unwrap_or_else(|e| Err(format!("handler failed: {e}"))),
        };
        self.current.lock().take();
        outcome
    }

    async fn terminate(&self) {
        match self.current.lock().take() {
            Some(cancel) => {
                debug!(port = self.port, "terminating in-process slot");
                cancel.cancel();
            }
            None => debug!(port = self.port, "in-process slot idle, nothing to terminate"),
        }
    }
}

#[async_trait]
impl BackendLauncher for InProcessLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    async fn create(&self, address: SlotAddress) -> Result<Arc<dyn WorkerBackend>, SchedulerError> {
        Ok(Arc::new(InProcessBackend {
            registry: Arc::clone(&self.registry),
            port: address.port,
            current: Mutex::new(None),
        }))
    }

    async fn destroy(&self, backend: Arc<dyn WorkerBackend>) {
        backend.terminate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    struct Sum;

    #[async_trait]
    impl crate::core::WorkHandler for Sum {
        async fn execute(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String> {
            log.log("summing");
            Ok(json!(work.args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }
    }

    struct Forever;

    #[async_trait]
    impl crate::core::WorkHandler for Forever {
        async fn execute(&self, _work: &WorkDescriptor, _log: &WorkLogger) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    async fn slot() -> Arc<dyn WorkerBackend> {
        let mut registry = WorkRegistry::new();
        registry.register("sum", Sum).register("forever", Forever);
        InProcessLauncher::new(registry)
            .create(SlotAddress {
                port: 9100,
                api_path: "/work".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_runs_registered_handler() {
        let backend = slot().await;
        let (logger, mut lines) = WorkLogger::channel();
        let work = WorkDescriptor::new("sum").with_args(vec![json!(2), json!(3)]);

        assert_eq!(backend.run(&work, &logger).await, Ok(json!(5)));
        assert_eq!(lines.recv().await.unwrap().message, "summing");
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_the_unit() {
        let backend = slot().await;
        let (logger, _lines) = WorkLogger::channel();
        let err = backend
            .run(&WorkDescriptor::new("missing"), &logger)
            .await
            .unwrap_err();
        assert!(err.contains("unknown work kind"));
    }

    #[tokio::test]
    async fn test_terminate_resolves_running_unit() {
        let backend = slot().await;
        let runner = Arc::clone(&backend);
        let running = tokio::spawn(async move {
            let (logger, _lines) = WorkLogger::channel();
            runner.run(&WorkDescriptor::new("forever"), &logger).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.terminate().await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Err("terminated".to_string()));
    }

    #[tokio::test]
    async fn test_slot_runs_again_after_terminate() {
        let backend = slot().await;
        backend.terminate().await;

        let runner = Arc::clone(&backend);
        let running = tokio::spawn(async move {
            let (logger, _lines) = WorkLogger::channel();
            runner.run(&WorkDescriptor::new("forever"), &logger).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.terminate().await;
        let outcome = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Err("terminated".to_string()));

        let (logger, _lines) = WorkLogger::channel();
        let work = WorkDescriptor::new("sum").with_args(vec![json!(1), json!(1)]);
        assert_eq!(backend.run(&work, &logger).await, Ok(json!(2)));
    }
}
