//! Tests for error types

use std::time::Duration;

use prometheus_work_scheduler::core::SchedulerError;

#[test]
fn test_error_display() {
    assert_eq!(
        SchedulerError::DuplicateWork("abc".into()).to_string(),
        "duplicate work: abc is already queued or running"
    );
    assert_eq!(
        SchedulerError::UnknownWorkKind("render".into()).to_string(),
        "unknown work kind: render"
    );
    assert_eq!(
        SchedulerError::AcquireTimeout(Duration::from_millis(100)).to_string(),
        "acquire timed out after 100ms"
    );
    assert_eq!(SchedulerError::NotStarted.to_string(), "not started");
    assert_eq!(SchedulerError::ShutDown.to_string(), "shut down");
}

#[test]
fn test_every_variant_is_raised_somewhere() {
    // Exhaustive: a new variant does not compile until it is listed with its producer.
    fn describe(err: &SchedulerError) -> &'static str {
        match err {
            SchedulerError::DuplicateWork(_) => "push_work",
            SchedulerError::UnknownWorkKind(_) => "registry",
            SchedulerError::AcquireTimeout(_) => "pools",
            SchedulerError::NotStarted => "pools",
            SchedulerError::ShutDown => "pools",
            SchedulerError::InvalidState(_) => "tracker",
            SchedulerError::Transport(_) => "scheduler api",
            SchedulerError::Backend(_) => "launchers",
            SchedulerError::Closed => "completion handle",
            SchedulerError::Io(_) | SchedulerError::Serialization(_) => "conversions",
        }
    }
    assert_eq!(describe(&SchedulerError::ShutDown), "pools");
    assert_eq!(describe(&SchedulerError::Closed), "completion handle");
}

#[test]
fn test_error_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: SchedulerError = io.into();
    assert!(matches!(err, SchedulerError::Io(_)));
}

#[test]
fn test_error_from_json() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: SchedulerError = json_err.into();
    assert!(err.to_string().starts_with("serialization error"));
}
