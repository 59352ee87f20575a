//! Tests for audit sinks

use prometheus_work_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    assert!(sink.is_empty());

    sink.record(build_audit_event("work1", "pool1", AuditAction::Queued, Some("payload".into())));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].work_id, "work1");
    assert_eq!(events[0].pool, "pool1");
    assert_eq!(events[0].action, AuditAction::Queued);
    assert!(events[0].event_id.starts_with("work1-queued-"));
}

#[test]
fn test_audit_sink_drops_oldest() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("work1", "pool1", AuditAction::Queued, None));
    sink.record(build_audit_event("work2", "pool1", AuditAction::Queued, None));
    sink.record(build_audit_event("work3", "pool1", AuditAction::Queued, None));

    let events = sink.events();
    assert_eq!(sink.len(), 2);
    assert_eq!(events[0].work_id, "work2");
    assert_eq!(events[1].work_id, "work3");
}

#[test]
fn test_zero_capacity_sink_stores_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("work1", "pool1", AuditAction::Started, None));
    assert!(sink.is_empty());
}

#[test]
fn test_for_work_filters_by_unit() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event("a", "scheduler", AuditAction::Queued, None));
    sink.record(build_audit_event("b", "scheduler", AuditAction::Queued, None));
    sink.record(build_audit_event("a", "render", AuditAction::Started, None));

    let actions: Vec<_> = sink.for_work("a").into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Queued, AuditAction::Started]);
}

#[test]
fn test_audit_event_serializes_action_snake_case() {
    let event = build_audit_event("a", "scheduler", AuditAction::Rejected, Some("duplicate".into()));
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "rejected");
    assert_eq!(json["payload"], "duplicate");
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingAuditSink;
    sink.record(build_audit_event("work1", "scheduler", AuditAction::Rejected, None));
}
