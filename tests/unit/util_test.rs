//! Tests for utility functions

use chrono::{TimeZone, Utc};
use prometheus_work_scheduler::util::{init_tracing, log_timestamp, new_work_id, now_ms};

#[test]
fn test_work_ids_are_unique() {
    let a = new_work_id();
    let b = new_work_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn test_log_timestamp_is_rfc3339_millis() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
    assert_eq!(log_timestamp(at), "2024-03-01T12:30:05.000Z");
}

#[test]
fn test_now_ms_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

#[test]
fn test_default_filter_parses() {
    let filter = tracing_subscriber::EnvFilter::new(prometheus_work_scheduler::util::DEFAULT_FILTER);
    assert!(filter.to_string().contains("prometheus_work_scheduler=debug"));
}
