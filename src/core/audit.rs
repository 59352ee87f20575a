//! Audit trail of the scheduler-side lifecycle of every unit of work.
//!
//! The scheduler records one [`AuditEvent`] per transition (queued, started, completed) and
//! per rejected submission. Sinks are synchronous and called outside the scheduler's state
//! lock.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Lifecycle transition recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Accepted by `push_work`.
    Queued,
    /// Taken by a pool.
    Started,
    /// Completion recorded.
    Completed,
    /// Refused at submission (duplicate uuid or unknown kind).
    Rejected,
}

impl AuditAction {
    /// Lowercase name, as used in event ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// `{work_id}-{action}-{created_at_ms}`.
    pub event_id: String,
    /// Unit of work the event is about.
    pub work_id: String,
    /// Pool involved, or `scheduler` for events raised before assignment.
    pub pool: String,
    /// Transition recorded.
    pub action: AuditAction,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u128,
    /// Extra context, e.g. the rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Destination for audit events.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory sink; the oldest events are dropped first.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Sink keeping at most `max_events`.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Every stored event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Stored events for one unit of work, oldest first.
    #[must_use]
    pub fn for_work(&self, work_id: &str) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| e.work_id == work_id)
            .cloned()
            .collect()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that emits every event as a structured `tracing` record under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            work_id = %event.work_id,
            pool = %event.pool,
            action = %event.action,
            payload = event.payload.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Stamp an event for `work_id` with the current time.
pub fn build_audit_event(
    work_id: impl Into<String>,
    pool: impl Into<String>,
    action: AuditAction,
    payload: Option<String>,
) -> AuditEvent {
    let work_id = work_id.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{work_id}-{action}-{created_at_ms}"),
        work_id,
        pool: pool.into(),
        action,
        created_at_ms,
        payload,
    }
}
