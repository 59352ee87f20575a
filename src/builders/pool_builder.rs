//! Builders to construct the scheduler and worker pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{SchedulerConfig, ServiceConfig, WorkerPoolConfig};
use crate::core::{BackendLauncher, QueueScheduler, SchedulerApi, SchedulerError, WorkerPool};

/// Build the scheduler described by `cfg`.
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<Arc<QueueScheduler>, SchedulerError> {
    let scheduler = QueueScheduler::new(cfg)?;
    info!(
        archive = ?cfg.archive_dir,
        known_kinds = cfg.known_kinds.len(),
        "scheduler built"
    );
    Ok(Arc::new(scheduler))
}

/// Build one stopped worker pool per configured entry, using `launcher_factory` for each
/// pool's backend. The map key is used as the pool id.
pub fn build_worker_pools<L, F>(
    cfg: &ServiceConfig,
    scheduler: Arc<dyn SchedulerApi>,
    mut launcher_factory: F,
) -> Result<HashMap<String, Arc<WorkerPool<L>>>, SchedulerError>
where
    L: BackendLauncher,
    F: FnMut(&str, &WorkerPoolConfig) -> Result<L, SchedulerError>,
{
    cfg.validate()
        .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let mut pool_cfg = pool_cfg.clone();
        pool_cfg.pool_id.clone_from(name);
        let launcher = launcher_factory(name, &pool_cfg)?;
        let pool = WorkerPool::new(pool_cfg, launcher, Arc::clone(&scheduler))?;
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}
