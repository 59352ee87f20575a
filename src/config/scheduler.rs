//! Scheduler and service-level configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::WorkerPoolConfig;
use crate::core::AppResult;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "WORK_SCHEDULER_CONFIG";

/// Configuration of the [`QueueScheduler`](crate::core::QueueScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Root under which completed work is archived; `None` disables archival.
    pub archive_dir: Option<PathBuf>,
    /// Archive into one subdirectory per calendar day.
    pub rotate_daily: bool,
    /// Capacity of the notification channel.
    pub event_capacity: usize,
    /// Work kinds accepted by `push_work`; empty accepts any kind.
    pub known_kinds: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            archive_dir: None,
            rotate_daily: true,
            event_capacity: 1024,
            known_kinds: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than 0".into());
        }
        if self.known_kinds.iter().any(|k| k.trim().is_empty()) {
            return Err("known_kinds must not contain empty names".into());
        }
        Ok(())
    }
}

/// Root configuration: one scheduler and its worker pools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Map of pool name to configuration.
    pub pools: HashMap<String, WorkerPoolConfig>,
}

impl ServiceConfig {
    /// Validate the scheduler and all pools.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse service configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read the file named by `WORK_SCHEDULER_CONFIG`.
    ///
    /// Without the variable the defaults are returned.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a valid configuration.
    pub fn load_from_env() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env loaded");
        }
        let Ok(path) = std::env::var(CONFIG_PATH_ENV) else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading configuration from {path}"))?;
        Self::from_json_str(&raw).map_err(|e| anyhow::anyhow!("{path}: {e}"))
    }
}
