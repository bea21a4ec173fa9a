//! `PulseServer` — the composition root.
//!
//! Constructs the pool, router, monitor, governor, leak detector, alert
//! pipeline, cache, queue, and batch processor once, injects them into each
//! other, and owns the single process-wide `start()`/`stop()` lifecycle.
//! There are no module-level singletons: everything reachable from a route
//! handler travels through [`AppState`].
//!
//! Payload-carrying frames (`progress_update`, `log_message`,
//! `notification`, `metric`, `event`) arriving from publisher clients are
//! enqueued on the priority queue; the batch processor fans them back out
//! through the router and memoizes delivery results in the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::info;

use pulse_cache::IntelligentCache;
use pulse_core::{Frame, FrameType, MessagePriority, codes};
use pulse_queue::{BatchError, BatchHandler, BatchProcessor, PriorityMessageQueue, QueuedMessage};
use pulse_settings::PulseSettings;

use crate::governor::alerts::AlertPipeline;
use crate::governor::governor::ConnectionPoolGovernor;
use crate::governor::leak::ResourceLeakDetector;
use crate::governor::monitor::ResourceMonitor;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::Connection;
use crate::websocket::handler::{FrameHandler, HandlerContext, HandlerRegistry};
use crate::websocket::pool::ConnectionPool;
use crate::websocket::router::ConnectionBroadcastRouter;
use crate::websocket::session::run_ws_session;

/// Name of the queue fed by publisher frames.
pub const INGRESS_QUEUE: &str = "ingress";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast router (owns accept/dispatch).
    pub router: Arc<ConnectionBroadcastRouter>,
    /// Pool governor (health classification).
    pub governor: Arc<ConnectionPoolGovernor>,
    /// Ingress queue (depth reporting).
    pub queue: Arc<PriorityMessageQueue>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
    /// WebSocket message size cap.
    pub max_message_size: usize,
}

/// The Pulse gateway server.
pub struct PulseServer {
    settings: PulseSettings,
    router: Arc<ConnectionBroadcastRouter>,
    monitor: Arc<ResourceMonitor>,
    governor: Arc<ConnectionPoolGovernor>,
    detector: Arc<ResourceLeakDetector>,
    alerts: Arc<AlertPipeline>,
    cache: Arc<IntelligentCache>,
    queue: Arc<PriorityMessageQueue>,
    processor: Arc<BatchProcessor>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    prometheus: Option<PrometheusHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PulseServer {
    /// Wire every component together from settings.
    #[must_use]
    pub fn new(settings: PulseSettings) -> Self {
        let queue = Arc::new(PriorityMessageQueue::new(&settings.queue));
        let cache = Arc::new(IntelligentCache::new(&settings.cache));

        let mut registry = HandlerRegistry::with_defaults();
        let ingress = IngressHandler {
            queue: queue.clone(),
            message_ttl: Duration::from_secs(settings.queue.message_ttl_secs),
        };
        for frame_type in [
            FrameType::ProgressUpdate,
            FrameType::LogMessage,
            FrameType::Notification,
            FrameType::Metric,
            FrameType::Event,
        ] {
            registry.register(frame_type, ingress.clone());
        }

        let pool = Arc::new(ConnectionPool::new(settings.server.max_connections));
        let router = Arc::new(ConnectionBroadcastRouter::new(
            pool,
            Arc::new(registry),
            &settings.server,
        ));
        let monitor = Arc::new(ResourceMonitor::new(
            settings.governor.clone(),
            settings.server.max_connections,
            settings.queue.max_size,
        ));
        let governor = Arc::new(ConnectionPoolGovernor::new(
            router.clone(),
            monitor.clone(),
            queue.clone(),
            settings.governor.clone(),
            settings.queue.max_size,
        ));
        let detector = Arc::new(ResourceLeakDetector::new());
        let alerts = Arc::new(AlertPipeline::new(
            detector.clone(),
            router.clone(),
            &settings.governor,
        ));
        let processor = Arc::new(BatchProcessor::new(
            queue.clone(),
            cache.clone(),
            Arc::new(EventFanoutHandler {
                router: router.clone(),
            }),
            &settings.queue,
            INGRESS_QUEUE,
        ));

        Self {
            settings,
            router,
            monitor,
            governor,
            detector,
            alerts,
            cache,
            queue,
            processor,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            prometheus: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach an installed Prometheus recorder handle.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Spawn every background activity: router loops, governor loop, leak
    /// alert sweeps, and the batch processor.
    pub fn start(&self) {
        self.router.start();
        self.governor.start();

        let token = self.shutdown.token();
        let alerts = self.alerts.clone();
        let alert_task = tokio::spawn(async move { alerts.run(token).await });

        let token = self.shutdown.token();
        let processor = self.processor.clone();
        let batch_task = tokio::spawn(async move { processor.run(token).await });

        let mut tasks = self.tasks.lock();
        tasks.push(alert_task);
        tasks.push(batch_task);
        info!("pulse server started");
    }

    /// Stop every background activity and wait for the loops to exit.
    pub async fn stop(&self) {
        self.router.stop().await;
        self.governor.stop().await;
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        self.shutdown.graceful_shutdown(handles, None).await;
        info!("pulse server stopped");
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            router: self.router.clone(),
            governor: self.governor.clone(),
            queue: self.queue.clone(),
            start_time: self.start_time,
            prometheus: self.prometheus.clone(),
            max_message_size: self.settings.server.max_message_size,
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state)
    }

    /// The broadcast router.
    #[must_use]
    pub fn broadcast(&self) -> &Arc<ConnectionBroadcastRouter> {
        &self.router
    }

    /// The pool governor.
    #[must_use]
    pub fn governor(&self) -> &Arc<ConnectionPoolGovernor> {
        &self.governor
    }

    /// The resource monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// The leak detector.
    #[must_use]
    pub fn leak_detector(&self) -> &Arc<ResourceLeakDetector> {
        &self.detector
    }

    /// The result/lookup cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<IntelligentCache> {
        &self.cache
    }

    /// The ingress queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<PriorityMessageQueue> {
        &self.queue
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The loaded settings.
    #[must_use]
    pub fn settings(&self) -> &PulseSettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.router.pool().count(),
        state.queue.total_len(),
        state.governor.health().as_str(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default()
}

/// GET /ws — upgrade to a WebSocket session.
///
/// Optional `subject_id` / `owner_id` query parameters scope the
/// connection; they are validated upstream and only checked for emptiness
/// here.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let subject_id = params.get("subject_id").cloned();
    let owner_id = params.get("owner_id").cloned();
    let router = state.router.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, router, subject_id, owner_id))
        .into_response()
}

/// Enqueues publisher frames onto the priority queue.
///
/// Priorities: notifications jump the line, metrics and log lines ride in
/// the back, progress and generic events take the middle.
#[derive(Clone)]
struct IngressHandler {
    queue: Arc<PriorityMessageQueue>,
    message_ttl: Duration,
}

#[async_trait]
impl FrameHandler for IngressHandler {
    async fn handle(
        &self,
        frame: Frame,
        connection: &Arc<Connection>,
        _ctx: &HandlerContext,
    ) -> Option<Frame> {
        let priority = match frame.frame_type {
            FrameType::Notification => MessagePriority::High,
            FrameType::Metric | FrameType::LogMessage => MessagePriority::Low,
            _ => MessagePriority::Normal,
        };
        let payload = json!({
            "frame": frame,
            "subjectId": connection.subject_id,
            "ownerId": connection.owner_id,
            "connectionId": connection.id.as_str(),
        });
        let message = QueuedMessage::new(payload, priority, self.message_ttl);
        if self.queue.enqueue(INGRESS_QUEUE, message) {
            None
        } else {
            Some(Frame::error(codes::QUEUE_FULL, "ingress queue is full"))
        }
    }
}

/// Fans processed ingress messages back out through the router.
struct EventFanoutHandler {
    router: Arc<ConnectionBroadcastRouter>,
}

#[async_trait]
impl BatchHandler for EventFanoutHandler {
    async fn process(&self, message: &QueuedMessage) -> Result<Value, BatchError> {
        let frame_value = message
            .payload
            .get("frame")
            .ok_or_else(|| BatchError::Handler("payload missing frame".into()))?;
        let frame: Frame = serde_json::from_value(frame_value.clone())
            .map_err(|error| BatchError::Handler(error.to_string()))?;

        let delivered = match message.payload.get("subjectId").and_then(Value::as_str) {
            Some(subject_id) => self.router.broadcast_to_subject(subject_id, &frame),
            None => self.router.broadcast_all(&frame),
        };
        Ok(json!({ "delivered": delivered }))
    }
}
