//! API-facing request/response models for whichever transport fronts the scheduler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{CompletionHandle, PoolStats, QueueScheduler, SchedulerError, WorkDescriptor};

/// Work submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkRequest {
    /// Caller-chosen identifier; one is assigned when absent.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Registered work kind.
    pub work_kind: String,
    /// Compatibility tags the backend must understand.
    #[serde(default)]
    pub compatibility: Vec<String>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl From<SubmitWorkRequest> for WorkDescriptor {
    fn from(req: SubmitWorkRequest) -> Self {
        let mut descriptor = Self::new(req.work_kind).with_args(req.args);
        if let Some(uuid) = req.uuid {
            descriptor = descriptor.with_uuid(uuid);
        }
        for tag in req.compatibility {
            descriptor = descriptor.with_compatibility(tag);
        }
        descriptor
    }
}

/// Scheduler snapshot for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Queued units.
    pub queued: usize,
    /// Running units.
    pub running: usize,
    /// Whether every unit has reported completion.
    pub drained: bool,
    /// Per-pool statistics supplied by the caller.
    pub pools: Vec<PoolStats>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Submit work to the scheduler.
pub fn submit_work(
    scheduler: &QueueScheduler,
    req: SubmitWorkRequest,
) -> Result<CompletionHandle, SchedulerError> {
    scheduler.push_work(req.into())
}

/// Build a snapshot from the scheduler and pool statistics.
pub fn snapshot(scheduler: &QueueScheduler, pools: Vec<PoolStats>) -> SchedulerSnapshot {
    SchedulerSnapshot {
        queued: scheduler.queue_size(),
        running: scheduler.running_size(),
        drained: scheduler.is_drained(),
        pools,
    }
}

/// Return a health payload.
pub fn health() -> Health {
    Health { ok: true }
}
