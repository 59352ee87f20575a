//! Tests for builders

use std::collections::HashMap;
use std::sync::Arc;

use prometheus_work_scheduler::builders::{build_scheduler, build_worker_pools};
use prometheus_work_scheduler::config::{BackendKind, SchedulerConfig, ServiceConfig, WorkerPoolConfig};
use prometheus_work_scheduler::core::{SchedulerError, WorkRegistry};
use prometheus_work_scheduler::infra::InProcessLauncher;

fn service(pools: &[&str]) -> ServiceConfig {
    let mut map = HashMap::new();
    for name in pools {
        // pool_id is overridden by the map key
        map.insert((*name).to_string(), WorkerPoolConfig::new("placeholder"));
    }
    ServiceConfig {
        scheduler: SchedulerConfig::default(),
        pools: map,
    }
}

#[test]
fn test_build_scheduler() {
    let scheduler = build_scheduler(&SchedulerConfig::default()).unwrap();
    assert_eq!(scheduler.queue_size(), 0);
    assert!(scheduler.is_drained());
}

#[test]
fn test_build_scheduler_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        event_capacity: 0,
        ..SchedulerConfig::default()
    };
    assert!(matches!(build_scheduler(&cfg), Err(SchedulerError::Backend(_))));
}

#[tokio::test]
async fn test_build_worker_pools_uses_map_keys() {
    let scheduler = build_scheduler(&SchedulerConfig::default()).unwrap();
    let registry = Arc::new(WorkRegistry::new());
    let mut seen = Vec::new();

    let pools = build_worker_pools(&service(&["render", "thumbs"]), scheduler, |name, cfg| {
        seen.push((name.to_string(), cfg.pool_id.clone()));
        Ok(InProcessLauncher::from_shared(Arc::clone(&registry)))
    })
    .unwrap();

    assert_eq!(pools.len(), 2);
    assert_eq!(pools["render"].pool_id(), "render");
    assert!(seen.iter().all(|(name, id)| name == id));
}

#[tokio::test]
async fn test_build_worker_pools_rejects_backend_mismatch() {
    let scheduler = build_scheduler(&SchedulerConfig::default()).unwrap();
    let mut cfg = service(&["render"]);
    if let Some(pool) = cfg.pools.get_mut("render") {
        pool.backend = BackendKind::ChildProcess;
    }

    let result = build_worker_pools(&cfg, scheduler, |_, _| Ok(InProcessLauncher::new(WorkRegistry::new())));
    assert!(matches!(result, Err(SchedulerError::Backend(_))));
}
