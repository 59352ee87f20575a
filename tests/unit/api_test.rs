//! Tests for transport-facing models

use prometheus_work_scheduler::config::SchedulerConfig;
use prometheus_work_scheduler::core::{PoolStats, QueueScheduler, WorkDescriptor};
use prometheus_work_scheduler::runtime::{health, snapshot, submit_work, SubmitWorkRequest};
use serde_json::json;

#[test]
fn test_submit_request_from_camel_case_json() {
    let req: SubmitWorkRequest = serde_json::from_value(json!({
        "uuid": "abc",
        "workKind": "render",
        "compatibility": ["chrome"],
        "args": [1, "two"]
    }))
    .unwrap();

    let descriptor = WorkDescriptor::from(req);
    assert_eq!(descriptor.uuid, "abc");
    assert_eq!(descriptor.work_kind, "render");
    assert_eq!(descriptor.compatibility, vec!["chrome".to_string()]);
    assert_eq!(descriptor.args, vec![json!(1), json!("two")]);
}

#[test]
fn test_submit_work_and_snapshot() {
    let scheduler = QueueScheduler::new(&SchedulerConfig::default()).unwrap();
    let req: SubmitWorkRequest = serde_json::from_value(json!({ "workKind": "render" })).unwrap();

    let handle = submit_work(&scheduler, req).unwrap();
    assert!(!handle.uuid().is_empty());

    let snap = snapshot(&scheduler, vec![PoolStats::default()]);
    assert_eq!(snap.queued, 1);
    assert_eq!(snap.running, 0);
    assert!(!snap.drained);
    assert_eq!(snap.pools.len(), 1);
}

#[test]
fn test_health() {
    assert!(health().ok);
}
