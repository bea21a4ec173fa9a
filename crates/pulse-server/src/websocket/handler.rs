//! Inbound frame dispatch.
//!
//! Frames are routed through a dispatch table keyed by the typed
//! [`FrameType`] discriminator — no string matching. A frame that fails to
//! parse is answered with a typed `error` frame and the connection stays
//! open; a known type with no registered handler gets an `UNSUPPORTED`
//! error reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use pulse_core::{Frame, FrameType, codes};

use super::connection::Connection;
use super::pool::ConnectionPool;

/// Shared state handlers may consult.
pub struct HandlerContext {
    /// The connection registry.
    pub pool: Arc<ConnectionPool>,
    /// When the router was built (for uptime reporting).
    pub started_at: Instant,
}

/// A handler for one frame type.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle an inbound frame, optionally producing a reply for the sender.
    async fn handle(
        &self,
        frame: Frame,
        connection: &Arc<Connection>,
        ctx: &HandlerContext,
    ) -> Option<Frame>;
}

/// Dispatch table from frame type to handler.
pub struct HandlerRegistry {
    handlers: HashMap<FrameType, Arc<dyn FrameHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with the built-in protocol handlers installed
    /// (`ping`, `subscribe`, `unsubscribe`, `get_status`).
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FrameType::Ping, PingHandler);
        registry.register(FrameType::Subscribe, SubscribeHandler);
        registry.register(FrameType::Unsubscribe, UnsubscribeHandler);
        registry.register(FrameType::GetStatus, GetStatusHandler);
        registry
    }

    /// Register (or replace) the handler for a frame type.
    pub fn register<H: FrameHandler + 'static>(&mut self, frame_type: FrameType, handler: H) {
        let _ = self.handlers.insert(frame_type, Arc::new(handler));
    }

    /// Whether a handler is registered for the type.
    #[must_use]
    pub fn has_handler(&self, frame_type: FrameType) -> bool {
        self.handlers.contains_key(&frame_type)
    }

    /// Parse an inbound text frame and run its handler.
    ///
    /// Protocol errors produce an `error` reply, never a dropped
    /// connection.
    pub async fn dispatch(
        &self,
        text: &str,
        connection: &Arc<Connection>,
        ctx: &HandlerContext,
    ) -> Option<Frame> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                debug!(conn_id = %connection.id, "malformed JSON frame");
                return Some(Frame::error(codes::INVALID_FRAME, "frame is not valid JSON"));
            }
        };
        let frame: Frame = match serde_json::from_value(value) {
            Ok(frame) => frame,
            Err(_) => {
                debug!(conn_id = %connection.id, "frame with missing or unknown type");
                return Some(Frame::error(
                    codes::UNKNOWN_TYPE,
                    "frame type is missing or not recognized",
                ));
            }
        };

        match self.handlers.get(&frame.frame_type) {
            Some(handler) => handler.handle(frame, connection, ctx).await,
            None => {
                warn!(conn_id = %connection.id, frame_type = ?frame.frame_type, "unhandled frame type");
                Some(Frame::error(
                    codes::UNSUPPORTED,
                    "no handler registered for this frame type",
                ))
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Replies `pong` and refreshes liveness.
struct PingHandler;

#[async_trait]
impl FrameHandler for PingHandler {
    async fn handle(
        &self,
        _frame: Frame,
        connection: &Arc<Connection>,
        _ctx: &HandlerContext,
    ) -> Option<Frame> {
        connection.mark_alive();
        Some(Frame::pong())
    }
}

/// Extract the `eventTypes` string list from a subscribe/unsubscribe frame.
fn event_types_of(frame: &Frame) -> Option<Vec<String>> {
    let types = frame.data.as_ref()?.get("eventTypes")?.as_array()?;
    Some(
        types
            .iter()
            .filter_map(|value| value.as_str().map(ToOwned::to_owned))
            .collect(),
    )
}

/// Narrows the connection's event filter.
struct SubscribeHandler;

#[async_trait]
impl FrameHandler for SubscribeHandler {
    async fn handle(
        &self,
        frame: Frame,
        connection: &Arc<Connection>,
        _ctx: &HandlerContext,
    ) -> Option<Frame> {
        let Some(event_types) = event_types_of(&frame) else {
            return Some(Frame::error(
                codes::INVALID_FRAME,
                "subscribe requires data.eventTypes",
            ));
        };
        connection.subscribe(event_types);
        Some(Frame::connection(
            json!({ "subscribed": connection.subscriptions() }),
        ))
    }
}

/// Widens the connection's event filter.
struct UnsubscribeHandler;

#[async_trait]
impl FrameHandler for UnsubscribeHandler {
    async fn handle(
        &self,
        frame: Frame,
        connection: &Arc<Connection>,
        _ctx: &HandlerContext,
    ) -> Option<Frame> {
        let Some(event_types) = event_types_of(&frame) else {
            return Some(Frame::error(
                codes::INVALID_FRAME,
                "unsubscribe requires data.eventTypes",
            ));
        };
        connection.unsubscribe(event_types.iter().map(String::as_str));
        Some(Frame::connection(
            json!({ "subscribed": connection.subscriptions() }),
        ))
    }
}

/// Replies with a status snapshot.
struct GetStatusHandler;

#[async_trait]
impl FrameHandler for GetStatusHandler {
    async fn handle(
        &self,
        _frame: Frame,
        connection: &Arc<Connection>,
        ctx: &HandlerContext,
    ) -> Option<Frame> {
        Some(Frame::connection(json!({
            "connectionId": connection.id.as_str(),
            "connections": ctx.pool.count(),
            "maxConnections": ctx.pool.max_size(),
            "uptimeSecs": ctx.started_at.elapsed().as_secs(),
        })))
    }
}
