//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast deliveries total (counter).
pub const WS_BROADCAST_SENDS_TOTAL: &str = "ws_broadcast_sends_total";
/// Broadcast drops total (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Emergency cleanup passes total (counter).
pub const GOVERNOR_EMERGENCY_CLEANUPS_TOTAL: &str = "governor_emergency_cleanups_total";
/// Scale-down passes total (counter).
pub const GOVERNOR_SCALE_DOWNS_TOTAL: &str = "governor_scale_downs_total";
/// Latest health classification rank (gauge; 0 healthy – 3 critical).
pub const GOVERNOR_HEALTH_RANK: &str = "governor_health_rank";
/// Total queued ingress messages (gauge).
pub const QUEUE_DEPTH: &str = "queue_depth";
/// Messages rejected at queue capacity (counter, labels: queue).
pub const QUEUE_REJECTED_TOTAL: &str = "queue_rejected_total";
/// Messages discarded past their TTL (counter, labels: queue).
pub const QUEUE_EXPIRED_TOTAL: &str = "queue_expired_total";
/// Batch messages collected (counter, labels: queue).
pub const BATCH_COLLECTED_TOTAL: &str = "batch_collected_total";
/// Batch messages processed (counter, labels: queue).
pub const BATCH_PROCESSED_TOTAL: &str = "batch_processed_total";
/// Batch messages failed (counter, labels: queue).
pub const BATCH_FAILURES_TOTAL: &str = "batch_failures_total";
/// Leaks detected (counter, labels: `resource_type`).
pub const LEAKS_DETECTED_TOTAL: &str = "leaks_detected_total";
