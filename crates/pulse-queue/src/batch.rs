//! Batched message processing off the delivery loop.
//!
//! The processor collects messages until either the batch fills or the max
//! wait elapses, then hands them to a bounded worker pool. The collection
//! loop never runs handler code itself, so a slow handler cannot stall the
//! caller's heartbeat/broadcast cadence. Results are memoized in the cache
//! under `result:<message_id>`; failures are logged and the message dropped
//! (requeue policy belongs to the caller).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pulse_cache::IntelligentCache;
use pulse_settings::QueueSettings;

use crate::queue::{PriorityMessageQueue, QueuedMessage};

/// A batch-processing failure.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The handler rejected or failed to process the message.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Caller-supplied processing function for queued messages.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Process one message, returning the result to cache.
    async fn process(&self, message: &QueuedMessage) -> Result<Value, BatchError>;
}

/// Drains a named queue in batches through a bounded worker pool.
pub struct BatchProcessor {
    queue: Arc<PriorityMessageQueue>,
    cache: Arc<IntelligentCache>,
    handler: Arc<dyn BatchHandler>,
    workers: Arc<Semaphore>,
    queue_name: String,
    batch_size: usize,
    max_wait: Duration,
    result_ttl: Duration,
}

impl BatchProcessor {
    /// Create a processor for one named queue.
    #[must_use]
    pub fn new(
        queue: Arc<PriorityMessageQueue>,
        cache: Arc<IntelligentCache>,
        handler: Arc<dyn BatchHandler>,
        settings: &QueueSettings,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            cache,
            handler,
            workers: Arc::new(Semaphore::new(settings.workers)),
            queue_name: queue_name.into(),
            batch_size: settings.batch_size,
            max_wait: Duration::from_millis(settings.max_wait_ms),
            result_ttl: Duration::from_secs(settings.result_ttl_secs),
        }
    }

    /// Run the collect/dispatch loop until cancelled.
    ///
    /// Exits promptly at the next collection boundary after `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let batch = self.collect_batch(&cancel).await;
            if !batch.is_empty() {
                counter!("batch_collected_total", "queue" => self.queue_name.clone())
                    .increment(batch.len() as u64);
                self.dispatch(batch);
            }
            if cancel.is_cancelled() {
                debug!(queue = %self.queue_name, "batch processor stopping");
                break;
            }
        }
    }

    /// Collect up to `batch_size` messages or until `max_wait` elapses,
    /// whichever comes first.
    async fn collect_batch(&self, cancel: &CancellationToken) -> Vec<QueuedMessage> {
        let deadline = Instant::now() + self.max_wait;
        let mut batch = Vec::with_capacity(self.batch_size);

        while batch.len() < self.batch_size {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                message = self.queue.dequeue(&self.queue_name, remaining) => {
                    match message {
                        Some(message) => batch.push(message),
                        None => break,
                    }
                }
            }
        }
        batch
    }

    /// Hand a batch to the worker pool without awaiting completion.
    ///
    /// Each message runs in its own task gated by the semaphore, so at most
    /// `workers` handlers execute at once and backpressure falls on the
    /// queue, not on the delivery loop.
    fn dispatch(&self, batch: Vec<QueuedMessage>) {
        for message in batch {
            let workers = self.workers.clone();
            let handler = self.handler.clone();
            let cache = self.cache.clone();
            let queue_name = self.queue_name.clone();
            let result_ttl = self.result_ttl;
            drop(tokio::spawn(async move {
                let Ok(_permit) = workers.acquire().await else {
                    return;
                };
                match handler.process(&message).await {
                    Ok(result) => {
                        let key = format!("result:{}", message.id);
                        let _ = cache.set(key, result, Some(result_ttl));
                        counter!("batch_processed_total", "queue" => queue_name).increment(1);
                    }
                    Err(error) => {
                        warn!(
                            queue = %queue_name,
                            id = %message.id,
                            %error,
                            "batch message failed, dropping"
                        );
                        counter!("batch_failures_total", "queue" => queue_name).increment(1);
                    }
                }
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MessagePriority;
    use pulse_settings::CacheSettings;
    use serde_json::json;

    struct DoubleHandler;

    #[async_trait]
    impl BatchHandler for DoubleHandler {
        async fn process(&self, message: &QueuedMessage) -> Result<Value, BatchError> {
            let n = message.payload["n"].as_i64().unwrap_or(0);
            Ok(json!({"doubled": n * 2}))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl BatchHandler for FailingHandler {
        async fn process(&self, _message: &QueuedMessage) -> Result<Value, BatchError> {
            Err(BatchError::Handler("boom".into()))
        }
    }

    fn make_parts(handler: Arc<dyn BatchHandler>) -> (Arc<PriorityMessageQueue>, Arc<IntelligentCache>, BatchProcessor) {
        let settings = QueueSettings {
            batch_size: 4,
            max_wait_ms: 50,
            workers: 2,
            ..QueueSettings::default()
        };
        let queue = Arc::new(PriorityMessageQueue::new(&settings));
        let cache = Arc::new(IntelligentCache::new(&CacheSettings::default()));
        let processor = BatchProcessor::new(
            queue.clone(),
            cache.clone(),
            handler,
            &settings,
            "ingress",
        );
        (queue, cache, processor)
    }

    fn message(n: i64) -> QueuedMessage {
        QueuedMessage::new(json!({"n": n}), MessagePriority::Normal, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn results_are_cached_under_result_keys() {
        let (queue, cache, processor) = make_parts(Arc::new(DoubleHandler));
        let msg = message(21);
        let id = msg.id.clone();
        assert!(queue.enqueue("ingress", msg));

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { processor.run(cancel2).await });

        // Give the loop time to collect and the worker time to finish.
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = handle.await;

        let cached = cache.get(&format!("result:{id}"));
        assert_eq!(cached.unwrap()["doubled"], 42);
    }

    #[tokio::test]
    async fn failures_are_dropped_not_cached() {
        let (queue, cache, processor) = make_parts(Arc::new(FailingHandler));
        let msg = message(1);
        let id = msg.id.clone();
        assert!(queue.enqueue("ingress", msg));

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { processor.run(cancel2).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let _ = handle.await;

        assert!(cache.get(&format!("result:{id}")).is_none());
        assert!(queue.is_empty("ingress"));
    }

    #[tokio::test]
    async fn collect_batch_fills_up_to_batch_size() {
        let (queue, _cache, processor) = make_parts(Arc::new(DoubleHandler));
        for n in 0..10 {
            assert!(queue.enqueue("ingress", message(n)));
        }
        let cancel = CancellationToken::new();
        let batch = processor.collect_batch(&cancel).await;
        assert_eq!(batch.len(), 4);
        assert_eq!(queue.len("ingress"), 6);
    }

    #[tokio::test]
    async fn collect_batch_respects_max_wait_on_trickle() {
        let (queue, _cache, processor) = make_parts(Arc::new(DoubleHandler));
        assert!(queue.enqueue("ingress", message(1)));

        let cancel = CancellationToken::new();
        let start = Instant::now();
        let batch = processor.collect_batch(&cancel).await;
        // One message collected immediately; the wait for more stops at
        // max_wait rather than blocking until the batch fills.
        assert_eq!(batch.len(), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn run_exits_on_cancellation() {
        let (_queue, _cache, processor) = make_parts(Arc::new(DoubleHandler));
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Must return rather than loop forever.
        tokio::time::timeout(Duration::from_secs(1), processor.run(cancel))
            .await
            .expect("run should exit after cancellation");
    }
}
