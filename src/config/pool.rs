//! Resource pool, acquisition queue and worker pool configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution backend a worker pool launches its slots on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Handlers run as tasks inside this process.
    InProcess,
    /// One child process per slot.
    ChildProcess,
    /// One container per slot, acquired from a capacity-limited provider.
    Container,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess => write!(f, "in-process"),
            Self::ChildProcess => write!(f, "child-process"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Sizing and timing of a [`ResourcePool`](crate::core::ResourcePool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    /// Resources kept alive even when idle.
    pub min_size: usize,
    /// Hard upper bound on live resources.
    pub max_size: usize,
    /// How long `acquire` waits for a resource.
    pub acquire_timeout_ms: u64,
    /// How often a blocked `acquire` re-checks the pool.
    pub poll_interval_ms: u64,
    /// Period of the topup/trim task.
    pub maintenance_interval_ms: u64,
    /// Idle time after which an available resource above `min_size` is trimmed.
    pub idle_timeout_ms: u64,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: num_cpus::get(),
            acquire_timeout_ms: 30_000,
            poll_interval_ms: 100,
            maintenance_interval_ms: 1_000,
            idle_timeout_ms: 60_000,
        }
    }
}

impl ResourcePoolConfig {
    /// Defaults: no minimum, one resource per CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `min_size`.
    #[must_use]
    pub const fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Set `max_size`.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    /// Set the acquire poll interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the topup/trim period.
    #[must_use]
    pub const fn with_maintenance_interval_ms(mut self, ms: u64) -> Self {
        self.maintenance_interval_ms = ms;
        self
    }

    /// Set the idle trim threshold.
    #[must_use]
    pub const fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// Acquire timeout as a `Duration`.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Acquire poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maintenance period as a `Duration`.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Idle trim threshold as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate sizing and timing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".into());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.maintenance_interval_ms == 0 {
            return Err("maintenance_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Timing of an [`AcquisitionQueue`](crate::core::AcquisitionQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionQueueConfig {
    /// How long a request may wait before it is rejected.
    pub acquire_timeout_ms: u64,
    /// Delay before another dequeue pass when requests remain queued.
    pub redrive_delay_ms: u64,
}

impl Default for AcquisitionQueueConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 60_000,
            redrive_delay_ms: 50,
        }
    }
}

impl AcquisitionQueueConfig {
    /// Default timings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    /// Set the redrive delay.
    #[must_use]
    pub const fn with_redrive_delay_ms(mut self, ms: u64) -> Self {
        self.redrive_delay_ms = ms;
        self
    }

    /// Per-request timeout as a `Duration`.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Redrive delay as a `Duration`.
    #[must_use]
    pub const fn redrive_delay(&self) -> Duration {
        Duration::from_millis(self.redrive_delay_ms)
    }

    /// Validate timing values.
    pub fn validate(&self) -> Result<(), String> {
        if self.acquire_timeout_ms == 0 {
            return Err("acquire_timeout_ms must be greater than 0".into());
        }
        if self.redrive_delay_ms == 0 {
            return Err("redrive_delay_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Configuration of one [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Pool identifier, reported to the scheduler and used in logs.
    pub pool_id: String,
    /// Backend the slots run on.
    pub backend: BackendKind,
    /// Root under which each unit of work gets its own directory.
    pub work_dir: PathBuf,
    /// Delay between scheduler polls while no work is returned.
    pub poll_interval_ms: u64,
    /// Period of the push loop.
    pub push_interval_ms: u64,
    /// Maximum messages sent to the scheduler per flush.
    pub max_push_messages: usize,
    /// How long shutdown waits for unreported messages; negative waits forever.
    pub shutdown_force_after_ms: i64,
    /// First port handed to slot launchers; each new slot takes the next one.
    pub base_port: u16,
    /// API path handed to slot launchers.
    pub api_path: String,
    /// Keep per-unit directories after the result was handed to the scheduler.
    pub keep_work_dirs: bool,
    /// Sizing of the slot pool.
    pub slots: ResourcePoolConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_id: "default".into(),
            backend: BackendKind::InProcess,
            work_dir: std::env::temp_dir().join("prometheus-work"),
            poll_interval_ms: 250,
            push_interval_ms: 200,
            max_push_messages: 100,
            shutdown_force_after_ms: 30_000,
            base_port: 9100,
            api_path: "/work".into(),
            keep_work_dirs: false,
            slots: ResourcePoolConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults for a pool named `pool_id`.
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            ..Self::default()
        }
    }

    /// Set the backend kind.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the per-unit work directory root.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the push interval.
    #[must_use]
    pub const fn with_push_interval_ms(mut self, ms: u64) -> Self {
        self.push_interval_ms = ms;
        self
    }

    /// Set the per-flush message cap.
    #[must_use]
    pub const fn with_max_push_messages(mut self, max: usize) -> Self {
        self.max_push_messages = max;
        self
    }

    /// Set the shutdown drain bound; negative waits forever.
    #[must_use]
    pub const fn with_shutdown_force_after_ms(mut self, ms: i64) -> Self {
        self.shutdown_force_after_ms = ms;
        self
    }

    /// Keep per-unit directories after hand-off.
    #[must_use]
    pub const fn with_keep_work_dirs(mut self, keep: bool) -> Self {
        self.keep_work_dirs = keep;
        self
    }

    /// Set the slot pool sizing.
    #[must_use]
    pub fn with_slots(mut self, slots: ResourcePoolConfig) -> Self {
        self.slots = slots;
        self
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Push interval as a `Duration`.
    #[must_use]
    pub const fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    /// Shutdown drain bound, `None` meaning unbounded.
    #[must_use]
    pub fn shutdown_force_after(&self) -> Option<Duration> {
        u64::try_from(self.shutdown_force_after_ms)
            .ok()
            .map(Duration::from_millis)
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_id.trim().is_empty() {
            return Err("pool_id must not be empty".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.push_interval_ms == 0 {
            return Err("push_interval_ms must be greater than 0".into());
        }
        if self.max_push_messages == 0 {
            return Err("max_push_messages must be greater than 0".into());
        }
        self.slots.validate().map_err(|e| format!("slots: {e}"))
    }
}
