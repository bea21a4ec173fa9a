//! Connection lifecycle, scoped broadcast fan-out, and the heartbeat /
//! idle-cleanup loops.
//!
//! The router references connections only through the pool; any removal
//! goes through [`ConnectionPool::remove`] so the three indexes stay
//! consistent. Broadcast is best-effort per target: one failed send
//! disconnects that one connection and never aborts delivery to the rest —
//! callers receive the count of successful deliveries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::{ConnectionId, Frame, FrameType};
use pulse_settings::ServerSettings;

use super::connection::Connection;
use super::handler::{HandlerContext, HandlerRegistry};
use super::pool::ConnectionPool;

/// Why an accept was refused. No partial registration happens on failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceptError {
    /// The pool is at capacity.
    #[error("connection pool is at capacity ({capacity})")]
    PoolFull {
        /// The configured pool cap.
        capacity: usize,
    },
    /// A supplied identifier was present but empty.
    #[error("invalid {field} identifier")]
    InvalidIdentifier {
        /// Which identifier was rejected.
        field: &'static str,
    },
}

/// Connect/disconnect lifecycle, inbound dispatch, broadcast scopes, and
/// the two periodic background loops.
pub struct ConnectionBroadcastRouter {
    pool: Arc<ConnectionPool>,
    registry: Arc<HandlerRegistry>,
    ctx: HandlerContext,
    heartbeat_interval: Duration,
    cleanup_interval: Duration,
    connection_timeout: Duration,
    recent_capacity: usize,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionBroadcastRouter {
    /// Create a router over the given pool and dispatch table.
    #[must_use]
    pub fn new(
        pool: Arc<ConnectionPool>,
        registry: Arc<HandlerRegistry>,
        settings: &ServerSettings,
    ) -> Self {
        Self::with_timing(
            pool,
            registry,
            Duration::from_secs(settings.heartbeat_interval_secs),
            Duration::from_secs(settings.effective_cleanup_interval_secs()),
            Duration::from_secs(settings.connection_timeout_secs),
            settings.recent_messages_capacity,
        )
    }

    /// Create a router with explicit timing (used by tests and embedders).
    #[must_use]
    pub fn with_timing(
        pool: Arc<ConnectionPool>,
        registry: Arc<HandlerRegistry>,
        heartbeat_interval: Duration,
        cleanup_interval: Duration,
        connection_timeout: Duration,
        recent_capacity: usize,
    ) -> Self {
        let ctx = HandlerContext {
            pool: pool.clone(),
            started_at: Instant::now(),
        };
        Self {
            pool,
            registry,
            ctx,
            heartbeat_interval,
            cleanup_interval,
            connection_timeout,
            recent_capacity,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The pool this router serves.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Idle timeout applied by the cleanup loop.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Wrap an accepted transport session as a pooled connection.
    ///
    /// Identifiers are validated by the caller; this layer only rejects
    /// identifiers that are present but empty, with no partial
    /// registration. A full pool yields [`AcceptError::PoolFull`].
    pub fn accept(
        &self,
        subject_id: Option<String>,
        owner_id: Option<String>,
        metadata: HashMap<String, String>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Result<Arc<Connection>, AcceptError> {
        if subject_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AcceptError::InvalidIdentifier { field: "subject" });
        }
        if owner_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AcceptError::InvalidIdentifier { field: "owner" });
        }

        let connection = Arc::new(Connection::new(
            ConnectionId::new(),
            owner_id,
            subject_id,
            metadata,
            tx,
            self.recent_capacity,
        ));
        if !self.pool.add(connection.clone()) {
            return Err(AcceptError::PoolFull {
                capacity: self.pool.max_size(),
            });
        }

        counter!("ws_connections_total").increment(1);
        gauge!("ws_connections_active").increment(1.0);
        info!(
            conn_id = %connection.id,
            subject = connection.subject_id.as_deref().unwrap_or("-"),
            owner = connection.owner_id.as_deref().unwrap_or("-"),
            "client connected"
        );
        Ok(connection)
    }

    /// Remove a connection from the pool and mark it dead.
    ///
    /// Idempotent: returns `false` when the id is already gone.
    pub fn disconnect(&self, id: &str, reason: &str) -> bool {
        let Some(connection) = self.pool.remove(id) else {
            return false;
        };
        connection.mark_dead();
        counter!("ws_disconnections_total", "reason" => reason.to_string()).increment(1);
        gauge!("ws_connections_active").decrement(1.0);
        histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
        info!(conn_id = id, reason, "client disconnected");
        true
    }

    /// Dispatch an inbound text frame from a connection.
    pub async fn handle_inbound(&self, text: &str, connection: &Arc<Connection>) -> Option<Frame> {
        connection.touch_heartbeat();
        connection.record_recent(summarize("recv", text));
        self.registry.dispatch(text, connection, &self.ctx).await
    }

    /// Send a frame to one connection.
    ///
    /// Transport failure disconnects that connection and returns `false`.
    pub fn send_to(&self, id: &str, frame: &Frame) -> bool {
        let Some(connection) = self.pool.by_id(id) else {
            return false;
        };
        if connection.send_frame(frame) {
            true
        } else {
            warn!(conn_id = id, "send failed, removing connection");
            let _ = self.disconnect(id, "send failure");
            false
        }
    }

    /// Broadcast to every connection observing a subject. Returns the
    /// number of successful deliveries.
    pub fn broadcast_to_subject(&self, subject_id: &str, frame: &Frame) -> usize {
        self.deliver(self.pool.by_subject(subject_id), frame)
    }

    /// Broadcast to every connection belonging to an owner. Returns the
    /// number of successful deliveries.
    pub fn broadcast_to_owner(&self, owner_id: &str, frame: &Frame) -> usize {
        self.deliver(self.pool.by_owner(owner_id), frame)
    }

    /// Broadcast to every connection. Returns the number of successful
    /// deliveries.
    pub fn broadcast_all(&self, frame: &Frame) -> usize {
        self.deliver(self.pool.all(), frame)
    }

    /// Best-effort fan-out. Partial success is the normal outcome: a failed
    /// send disconnects that one connection and delivery continues.
    fn deliver(&self, targets: Vec<Arc<Connection>>, frame: &Frame) -> usize {
        let Ok(json) = frame.encode() else {
            warn!(frame_type = ?frame.frame_type, "failed to serialize broadcast frame");
            return 0;
        };
        let payload = Arc::new(json);
        let event_filter = (frame.frame_type == FrameType::Event)
            .then(|| frame.event_type.clone())
            .flatten();

        let mut sent = 0;
        for connection in targets {
            if let Some(event_type) = &event_filter {
                if !connection.wants_event(event_type) {
                    continue;
                }
            }
            if connection.send(payload.clone()) {
                sent += 1;
            } else {
                warn!(conn_id = %connection.id, "broadcast send failed, removing connection");
                counter!("ws_broadcast_drops_total").increment(1);
                let _ = self.disconnect(connection.id.as_str(), "send failure");
            }
        }
        counter!("ws_broadcast_sends_total").increment(sent as u64);
        sent
    }

    /// Spawn the heartbeat and idle-cleanup loops.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        let heartbeat = {
            let router = self.clone();
            tokio::spawn(async move { router.heartbeat_loop().await })
        };
        let cleanup = {
            let router = self.clone();
            tokio::spawn(async move { router.cleanup_loop().await })
        };
        tasks.push(heartbeat);
        tasks.push(cleanup);
        debug!("router background loops started");
    }

    /// Stop both loops.
    ///
    /// Cancels the pending sleeps and waits for the loops to exit; neither
    /// loop runs again after this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        debug!("router background loops stopped");
    }

    async fn heartbeat_loop(&self) {
        let mut ticker = time::interval(self.heartbeat_interval);
        // The first tick completes immediately; skip it.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat_tick(),
                () = self.cancel.cancelled() => break,
            }
        }
    }

    /// Refresh every connection's heartbeat stamp and send a heartbeat
    /// frame. A failed send removes that connection.
    fn heartbeat_tick(&self) {
        let frame = Frame::heartbeat();
        let Ok(json) = frame.encode() else { return };
        let payload = Arc::new(json);
        for connection in self.pool.all() {
            connection.touch_heartbeat();
            if !connection.send(payload.clone()) {
                let _ = self.disconnect(connection.id.as_str(), "heartbeat send failure");
            }
        }
    }

    async fn cleanup_loop(&self) {
        let mut ticker = time::interval(self.cleanup_interval);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.cleanup_tick(),
                () = self.cancel.cancelled() => break,
            }
        }
    }

    /// Disconnect every connection idle past the timeout.
    fn cleanup_tick(&self) {
        for connection in self.pool.all() {
            if connection.idle_time() > self.connection_timeout {
                let _ = self.disconnect(connection.id.as_str(), "timeout");
            }
        }
    }
}

/// Short frame summary for the diagnostics ring buffer.
fn summarize(direction: &str, text: &str) -> String {
    const MAX: usize = 96;
    let mut summary = String::with_capacity(direction.len() + 1 + MAX);
    summary.push_str(direction);
    summary.push(' ');
    summary.extend(text.chars().take(MAX));
    summary
}
