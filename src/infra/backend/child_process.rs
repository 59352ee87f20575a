//! Slots backed by one long-lived child process each.
//!
//! The child is started as `<program> <args..> --port <port> --api-path <path>` and speaks
//! line-delimited JSON over its standard streams:
//!
//! ```text
//! stdin  → {"type":"run","descriptor":{...}}
//! stdout ← {"type":"log","message":"..."}
//! stdout ← {"type":"complete","result":...}  or  {"type":"complete","exception":"..."}
//! ```
//!
//! Lines on stdout that are not protocol messages are kept as work log lines. End of stream
//! fails the running unit. Terminating a slot kills its process, so a terminated slot is
//! never run again.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::BackendKind;
use crate::core::{
    BackendLauncher, SchedulerError, SlotAddress, WorkDescriptor, WorkLogger, WorkerBackend,
};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request<'a> {
    Run { descriptor: &'a WorkDescriptor },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Log {
        message: String,
    },
    Complete {
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        exception: Option<String>,
    },
}

/// Launches a child process per slot.
#[derive(Debug, Clone)]
pub struct ChildProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ChildProcessLauncher {
    /// Launcher running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Arguments placed before `--port`/`--api-path`.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Extra environment variable for every child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

struct ChildIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

struct ChildProcessBackend {
    port: u16,
    child: Mutex<Child>,
    io: Mutex<ChildIo>,
    cancel: CancellationToken,
}

impl ChildProcessBackend {
    async fn send(io: &mut ChildIo, work: &WorkDescriptor) -> Result<(), String> {
        let mut line = serde_json::to_string(&Request::Run { descriptor: work })
            .map_err(|e| format!("encode request: {e}"))?;
        line.push('\n');
        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("write to worker process: {e}"))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| format!("write to worker process: {e}"))
    }
}

#[async_trait]
impl WorkerBackend for ChildProcessBackend {
    async fn run(&self, work: &WorkDescriptor, log: &WorkLogger) -> Result<Value, String> {
        let mut io = self.io.lock().await;
        Self::send(&mut io, work).await?;

        loop {
            let line = tokio::select! {
                () = self.cancel.cancelled() => return Err("terminated".to_string()),
                line = io.stdout.next_line() => line,
            };
            match line {
                Ok(Some(text)) => match serde_json::from_str::<Reply>(&text) {
                    Ok(Reply::Log { message }) => log.log(message),
                    Ok(Reply::Complete {
                        exception: Some(exception),
                        ..
                    }) => return Err(exception),
                    Ok(Reply::Complete { result, .. }) => return Ok(result.unwrap_or(Value::Null)),
                    Err(_) => log.log(text),
                },
                Ok(None) => return Err("worker process exited".to_string()),
                Err(e) => return Err(format!("read from worker process: {e}")),
            }
        }
    }

    async fn terminate(&self) {
        self.cancel.cancel();
        if let Err(e) = self.child.lock().await.start_kill() {
            debug!(port = self.port, error = %e, "worker process already gone");
        }
    }
}

#[async_trait]
impl BackendLauncher for ChildProcessLauncher {
    fn kind(&self) -> BackendKind {
        BackendKind::ChildProcess
    }

    async fn create(&self, address: SlotAddress) -> Result<Arc<dyn WorkerBackend>, SchedulerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--port")
            .arg(address.port.to_string())
            .arg("--api-path")
            .arg(&address.api_path)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SchedulerError::Backend(format!("spawn {}: {e}", self.program.display()))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(SchedulerError::Backend("worker process has no stdio".into()));
        };
        info!(port = address.port, pid = child.id(), program = %self.program.display(), "worker process started");

        Ok(Arc::new(ChildProcessBackend {
            port: address.port,
            child: Mutex::new(child),
            io: Mutex::new(ChildIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            cancel: CancellationToken::new(),
        }))
    }

    async fn destroy(&self, backend: Arc<dyn WorkerBackend>) {
        backend.terminate().await;
    }
}
