//! Local, time-ordered buffer of messages waiting to reach the scheduler.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::PushMessage;

/// Shared buffer of log and completion messages. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct PushBuffer {
    inner: Arc<Mutex<VecDeque<PushMessage>>>,
}

impl PushBuffer {
    /// Empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&self, message: PushMessage) {
        self.inner.lock().push_back(message);
    }

    /// Remove and return up to `max` of the oldest messages by capture time.
    ///
    /// The sort is stable, so messages captured at the same instant keep arrival order.
    #[must_use]
    pub fn take_batch(&self, max: usize) -> Vec<PushMessage> {
        let mut inner = self.inner.lock();
        inner
            .make_contiguous()
            .sort_by_key(PushMessage::captured_at);
        let n = max.min(inner.len());
        inner.drain(..n).collect()
    }

    /// Put a batch that could not be delivered back at the front, keeping its order.
    pub fn requeue_front(&self, batch: Vec<PushMessage>) {
        let mut inner = self.inner.lock();
        for message in batch.into_iter().rev() {
            inner.push_front(message);
        }
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
