//! Tests for configuration validation

use std::time::Duration;

use prometheus_work_scheduler::config::{
    AcquisitionQueueConfig, BackendKind, ResourcePoolConfig, SchedulerConfig, ServiceConfig,
    WorkerPoolConfig,
};

#[test]
fn test_resource_pool_config_validation() {
    let valid = ResourcePoolConfig::new().with_min_size(1).with_max_size(4);
    assert!(valid.validate().is_ok());
    assert!(valid.max_size >= 1);
}

#[test]
fn test_resource_pool_config_invalid_max_size() {
    let invalid = ResourcePoolConfig::new().with_max_size(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_resource_pool_config_invalid_poll_interval() {
    let invalid = ResourcePoolConfig::new().with_poll_interval_ms(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_resource_pool_config_durations() {
    let cfg = ResourcePoolConfig::new()
        .with_acquire_timeout_ms(250)
        .with_idle_timeout_ms(5_000);
    assert_eq!(cfg.acquire_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.idle_timeout(), Duration::from_secs(5));
}

#[test]
fn test_acquisition_queue_config_defaults() {
    let cfg = AcquisitionQueueConfig::default();
    assert_eq!(cfg.acquire_timeout(), Duration::from_secs(60));
    assert!(cfg.validate().is_ok());
    assert!(AcquisitionQueueConfig::new()
        .with_redrive_delay_ms(0)
        .validate()
        .is_err());
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new("render").validate().is_ok());
    assert!(WorkerPoolConfig::new("").validate().is_err());
    assert!(WorkerPoolConfig::new("render")
        .with_push_interval_ms(0)
        .validate()
        .is_err());
    assert!(WorkerPoolConfig::new("render")
        .with_slots(ResourcePoolConfig::new().with_min_size(5).with_max_size(1))
        .validate()
        .is_err());
}

#[test]
fn test_scheduler_config_validation() {
    let cfg = SchedulerConfig {
        known_kinds: vec!["render".into(), " ".into()],
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = SchedulerConfig {
        event_capacity: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_service_config_from_json() {
    let json = r#"{
        "scheduler": { "archive_dir": "/var/lib/work", "known_kinds": ["render"] },
        "pools": {
            "render": {
                "pool_id": "render",
                "backend": "container",
                "poll_interval_ms": 50,
                "slots": { "min_size": 1, "max_size": 2 }
            }
        }
    }"#;
    let cfg = ServiceConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.scheduler.known_kinds, vec!["render".to_string()]);
    assert!(cfg.scheduler.rotate_daily);

    let pool = &cfg.pools["render"];
    assert_eq!(pool.backend, BackendKind::Container);
    assert_eq!(pool.poll_interval(), Duration::from_millis(50));
    assert_eq!(pool.slots.max_size, 2);
    assert_eq!(pool.api_path, "/work");
}

#[test]
fn test_service_config_rejects_malformed_json() {
    let err = ServiceConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_backend_kind_display() {
    assert_eq!(BackendKind::InProcess.to_string(), "in-process");
    assert_eq!(BackendKind::ChildProcess.to_string(), "child-process");
    assert_eq!(BackendKind::Container.to_string(), "container");
}
