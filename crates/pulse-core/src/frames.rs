//! Wire-protocol frames exchanged with WebSocket clients.
//!
//! Every inbound and outbound message is a [`Frame`] with a required `type`
//! discriminator drawn from the fixed [`FrameType`] enumeration. `event`
//! frames additionally carry an `event_type` string and a `data` payload;
//! `error` frames carry a machine-readable `code` and a human-readable
//! `message`. A frame whose `type` is not in the enumeration fails to
//! decode; the session layer answers it with an `error` frame rather than
//! dropping the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// The fixed set of frame discriminators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Client liveness probe.
    Ping,
    /// Reply to a `ping`.
    Pong,
    /// Narrow the connection's event-type filter.
    Subscribe,
    /// Widen the connection's event-type filter.
    Unsubscribe,
    /// Request a status snapshot.
    GetStatus,
    /// Server-pushed event with an `event_type` and `data`.
    Event,
    /// Protocol or capacity error report.
    Error,
    /// Task progress payload.
    ProgressUpdate,
    /// Log line payload.
    LogMessage,
    /// User-facing notification payload.
    Notification,
    /// Metric sample payload.
    Metric,
    /// Server-initiated liveness frame.
    Heartbeat,
    /// Connection lifecycle information (assigned id, acks).
    Connection,
}

/// Machine-readable error codes carried by `error` frames.
pub mod codes {
    /// The `type` field was missing or not in the enumeration.
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
    /// The frame was not valid JSON or violated the envelope shape.
    pub const INVALID_FRAME: &str = "INVALID_FRAME";
    /// The connection pool is at capacity.
    pub const POOL_EXHAUSTED: &str = "POOL_EXHAUSTED";
    /// The ingress queue is at capacity.
    pub const QUEUE_FULL: &str = "QUEUE_FULL";
    /// The frame type is known but has no registered handler.
    pub const UNSUPPORTED: &str = "UNSUPPORTED";
}

/// Well-known `event_type` values for `event` frames.
pub mod event_types {
    /// Deployment state changed.
    pub const DEPLOYMENT_STATUS: &str = "deployment_status";
    /// Platform-wide health classification changed.
    pub const PLATFORM_HEALTH: &str = "platform_health";
    /// An alert fired (e.g. a resource leak was detected).
    pub const ALERT_TRIGGERED: &str = "alert_triggered";
}

/// One wire message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Frame discriminator.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// ISO-8601 timestamp. Always set on outbound frames; optional inbound.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Event type (only on `event` frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Machine-readable error code (only on `error` frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message (only on `error` frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Frame {
    /// Create a bare frame of the given type, stamped with the current time.
    #[must_use]
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type: None,
            data: None,
            code: None,
            message: None,
        }
    }

    /// Create an `event` frame.
    #[must_use]
    pub fn event(event_type: impl Into<String>, data: Value) -> Self {
        let mut frame = Self::new(FrameType::Event);
        frame.event_type = Some(event_type.into());
        frame.data = Some(data);
        frame
    }

    /// Create an `error` frame.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameType::Error);
        frame.code = Some(code.into());
        frame.message = Some(message.into());
        frame
    }

    /// Create a `heartbeat` frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(FrameType::Heartbeat)
    }

    /// Create a `pong` frame.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(FrameType::Pong)
    }

    /// Create a `connection` frame with the given payload.
    #[must_use]
    pub fn connection(data: Value) -> Self {
        Self::new(FrameType::Connection).with_data(data)
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a frame from the wire representation.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
