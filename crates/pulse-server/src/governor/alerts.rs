//! Leak alert pipeline.
//!
//! Periodically sweeps the leak detector and turns each flagged leak into
//! an `alert_triggered` event broadcast to subscribed clients, a structured
//! warning log, and a counter. It never reclaims the leaked resource.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pulse_core::{Frame, frames::event_types};
use pulse_settings::GovernorSettings;

use crate::websocket::router::ConnectionBroadcastRouter;

use super::leak::ResourceLeakDetector;

/// Sweeps leaks and fans alerts out through the router.
pub struct AlertPipeline {
    detector: Arc<ResourceLeakDetector>,
    router: Arc<ConnectionBroadcastRouter>,
    leak_timeout: Duration,
    min_count: u64,
    interval: Duration,
}

impl AlertPipeline {
    /// Create a pipeline from governor settings.
    #[must_use]
    pub fn new(
        detector: Arc<ResourceLeakDetector>,
        router: Arc<ConnectionBroadcastRouter>,
        settings: &GovernorSettings,
    ) -> Self {
        Self {
            detector,
            router,
            leak_timeout: Duration::from_secs(settings.leak_timeout_secs),
            min_count: settings.leak_min_count,
            interval: Duration::from_secs(settings.health_check_interval_secs),
        }
    }

    /// Override the sweep interval (tests, embedders).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run periodic sweeps until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    /// One detection pass. Returns the number of alerts raised.
    pub fn sweep(&self) -> usize {
        let leaks = self.detector.detect_leaks(self.leak_timeout, self.min_count);
        for leak in &leaks {
            warn!(
                resource_id = leak.resource_id,
                resource_type = leak.resource_type,
                level = ?leak.level,
                occurrences = leak.occurrence_count,
                "resource leak alert"
            );
            counter!("leaks_detected_total", "resource_type" => leak.resource_type.clone())
                .increment(1);
            let frame = Frame::event(
                event_types::ALERT_TRIGGERED,
                json!({
                    "kind": "resource_leak",
                    "resourceType": leak.resource_type,
                    "resourceId": leak.resource_id,
                    "level": leak.level,
                    "occurrenceCount": leak.occurrence_count,
                }),
            );
            let _ = self.router.broadcast_all(&frame);
        }
        leaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use pulse_core::FrameType;
    use tokio::sync::mpsc;

    use crate::websocket::handler::HandlerRegistry;
    use crate::websocket::pool::ConnectionPool;

    fn make_pipeline(leak_timeout: Duration) -> (AlertPipeline, Arc<ConnectionBroadcastRouter>) {
        let router = Arc::new(ConnectionBroadcastRouter::with_timing(
            Arc::new(ConnectionPool::new(10)),
            Arc::new(HandlerRegistry::with_defaults()),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            8,
        ));
        let detector = Arc::new(ResourceLeakDetector::new());
        let settings = GovernorSettings {
            leak_timeout_secs: leak_timeout.as_secs().max(1),
            ..GovernorSettings::default()
        };
        let mut pipeline = AlertPipeline::new(detector, router.clone(), &settings);
        pipeline.leak_timeout = leak_timeout;
        (pipeline, router)
    }

    #[tokio::test]
    async fn sweep_broadcasts_alert_frames() {
        let (pipeline, router) = make_pipeline(Duration::from_millis(20));
        let (tx, mut rx) = mpsc::channel(8);
        let _conn = router.accept(None, None, HashMap::new(), tx).unwrap();

        pipeline
            .detector
            .track("leaky", "connection", HashMap::new());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(pipeline.sweep(), 1);
        let text = rx.try_recv().unwrap();
        let frame = Frame::decode(&text).unwrap();
        assert_eq!(frame.frame_type, FrameType::Event);
        assert_eq!(frame.event_type.as_deref(), Some("alert_triggered"));
        let data = frame.data.unwrap();
        assert_eq!(data["resourceId"], "leaky");
        assert_eq!(data["kind"], "resource_leak");
    }

    #[tokio::test]
    async fn sweep_without_leaks_is_quiet() {
        let (pipeline, _router) = make_pipeline(Duration::from_secs(60));
        pipeline
            .detector
            .track("fresh", "connection", HashMap::new());
        assert_eq!(pipeline.sweep(), 0);
    }

    #[tokio::test]
    async fn run_exits_on_cancellation() {
        let (pipeline, _router) = make_pipeline(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), pipeline.run(cancel))
            .await
            .expect("pipeline should exit after cancellation");
    }
}
