//! The narrow contract between the queue's consumers and its backing store.
//!
//! The in-memory [`PriorityMessageQueue`] is the default implementation. An
//! external store (e.g. Redis: a priority-ordered set write plus a TTL'd
//! value write keyed by message id, popped with a blocking highest-priority
//! read) can be slotted behind the same four operations without touching the
//! batch processor.

use std::time::Duration;

use async_trait::async_trait;

use crate::queue::{PriorityMessageQueue, QueuedMessage};

/// Push/pop contract over a named priority queue.
#[async_trait]
pub trait PriorityStore: Send + Sync {
    /// Store a message. Returns `false` when the queue is at capacity.
    async fn push(&self, queue_name: &str, message: QueuedMessage) -> bool;

    /// Pop the highest-priority message, waiting up to `timeout`.
    async fn pop(&self, queue_name: &str, timeout: Duration) -> Option<QueuedMessage>;

    /// Drain up to `max` messages without waiting.
    async fn pop_batch(&self, queue_name: &str, max: usize) -> Vec<QueuedMessage>;

    /// Current depth of the named queue.
    async fn depth(&self, queue_name: &str) -> usize;
}

#[async_trait]
impl PriorityStore for PriorityMessageQueue {
    async fn push(&self, queue_name: &str, message: QueuedMessage) -> bool {
        self.enqueue(queue_name, message)
    }

    async fn pop(&self, queue_name: &str, timeout: Duration) -> Option<QueuedMessage> {
        self.dequeue(queue_name, timeout).await
    }

    async fn pop_batch(&self, queue_name: &str, max: usize) -> Vec<QueuedMessage> {
        self.dequeue_batch(queue_name, max)
    }

    async fn depth(&self, queue_name: &str) -> usize {
        self.len(queue_name)
    }
}
