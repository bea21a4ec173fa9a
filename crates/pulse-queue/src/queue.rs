//! Named priority queues with cooperative blocking dequeue.
//!
//! Each named queue keeps its payloads in a map keyed by message id and a
//! `BTreeSet` index of `(priority rank, arrival seq, id)` — the same shape
//! as the external-store contract (sorted set + value keys). Pops take the
//! index minimum, so priority strictly dominates arrival order and arrival
//! order breaks ties within a class. A popped message past its TTL is
//! discarded rather than delivered.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use pulse_core::{MessageId, MessagePriority};
use pulse_settings::QueueSettings;

/// One unit of work in flight through a queue.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    /// Unique message id.
    pub id: MessageId,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Priority class.
    pub priority: MessagePriority,
    /// When the message entered the queue.
    pub enqueued_at: Instant,
    /// Time-to-live measured from `enqueued_at`.
    pub ttl: Duration,
    /// Delivery attempts so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    /// Retry budget. Requeue policy itself belongs to the caller.
    pub max_retries: u32,
}

impl QueuedMessage {
    /// Create a message with a fresh id.
    #[must_use]
    pub fn new(payload: Value, priority: MessagePriority, ttl: Duration) -> Self {
        Self {
            id: MessageId::new(),
            payload,
            priority,
            enqueued_at: Instant::now(),
            ttl,
            retry_count: 0,
            max_retries: 3,
        }
    }

    /// Whether the message has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.enqueued_at.elapsed() > self.ttl
    }
}

#[derive(Default)]
struct QueueState {
    /// Payloads keyed by message id.
    messages: HashMap<String, QueuedMessage>,
    /// Ordered index: (priority rank, arrival seq, message id).
    index: BTreeSet<(u8, u64, String)>,
    next_seq: u64,
}

/// In-process priority queue over named sub-queues.
///
/// One mutex guards all queue state; it is never held across an await.
/// Waiting consumers park on a shared [`Notify`] and re-check after wakeup,
/// so a wakeup for another queue is a harmless spurious retry.
pub struct PriorityMessageQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Arc<Notify>,
    max_size: usize,
}

impl PriorityMessageQueue {
    /// Create a queue family from settings.
    #[must_use]
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
            max_size: settings.max_size,
        }
    }

    /// Enqueue a message.
    ///
    /// Returns `false` (with no partial mutation) when the named queue is at
    /// capacity — an expected steady-state condition under load, not an
    /// error.
    pub fn enqueue(&self, queue_name: &str, message: QueuedMessage) -> bool {
        {
            let mut queues = self.queues.lock();
            let state = queues.entry(queue_name.to_string()).or_default();
            if state.messages.len() >= self.max_size {
                counter!("queue_rejected_total", "queue" => queue_name.to_string()).increment(1);
                debug!(queue = queue_name, "queue at capacity, message rejected");
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let _ = state.index.insert((
                message.priority.rank(),
                seq,
                message.id.as_str().to_string(),
            ));
            let _ = state
                .messages
                .insert(message.id.as_str().to_string(), message);
        }
        self.notify.notify_waiters();
        true
    }

    /// Pop the highest-priority live message, waiting up to `timeout` for
    /// one to arrive. Returns `None` on timeout.
    pub async fn dequeue(&self, queue_name: &str, timeout: Duration) -> Option<QueuedMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so an enqueue that lands
            // between the check and the await still wakes us.
            let notified = self.notify.notified();

            if let Some(message) = self.try_pop(queue_name) {
                return Some(message);
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(remaining) => {
                    return self.try_pop(queue_name);
                }
            }
        }
    }

    /// Drain up to `batch_size` messages without waiting.
    pub fn dequeue_batch(&self, queue_name: &str, batch_size: usize) -> Vec<QueuedMessage> {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match self.try_pop(queue_name) {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        batch
    }

    /// Depth of one named queue.
    pub fn len(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .get(queue_name)
            .map_or(0, |state| state.messages.len())
    }

    /// Whether the named queue holds no messages.
    pub fn is_empty(&self, queue_name: &str) -> bool {
        self.len(queue_name) == 0
    }

    /// Total depth across all named queues (feeds the resource monitor).
    pub fn total_len(&self) -> usize {
        self.queues
            .lock()
            .values()
            .map(|state| state.messages.len())
            .sum()
    }

    /// Pop the index minimum, discarding expired messages along the way.
    fn try_pop(&self, queue_name: &str) -> Option<QueuedMessage> {
        let mut queues = self.queues.lock();
        let state = queues.get_mut(queue_name)?;
        while let Some(entry) = state.index.first().cloned() {
            let _ = state.index.remove(&entry);
            let (_, _, id) = entry;
            let Some(message) = state.messages.remove(&id) else {
                continue;
            };
            if message.is_expired() {
                counter!("queue_expired_total", "queue" => queue_name.to_string()).increment(1);
                debug!(queue = queue_name, id = %message.id, "discarded expired message");
                continue;
            }
            return Some(message);
        }
        None
    }
}
