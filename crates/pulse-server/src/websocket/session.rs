//! WebSocket session lifecycle — one connected client from upgrade through
//! disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use pulse_core::{Frame, codes};

use super::router::{AcceptError, ConnectionBroadcastRouter};

/// Outbound channel depth per connection.
const SEND_BUFFER: usize = 1024;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection (replying with a typed `error` frame and
///    closing if the pool refuses it)
/// 2. Sends a `connection` frame carrying the assigned id
/// 3. Dispatches inbound frames through the router's handler table
/// 4. Forwards outbound frames from the connection's send channel
/// 5. Disconnects and removes the connection on close or transport error
#[instrument(skip_all)]
pub async fn run_ws_session(
    ws: WebSocket,
    router: Arc<ConnectionBroadcastRouter>,
    subject_id: Option<String>,
    owner_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(SEND_BUFFER);

    let connection = match router.accept(subject_id, owner_id, HashMap::new(), send_tx) {
        Ok(connection) => connection,
        Err(error) => {
            let code = match error {
                AcceptError::PoolFull { .. } => codes::POOL_EXHAUSTED,
                AcceptError::InvalidIdentifier { .. } => codes::INVALID_FRAME,
            };
            info!(%error, "connection refused");
            if let Ok(json) = Frame::error(code, error.to_string()).encode() {
                let _ = ws_tx.send(Message::Text(json.into())).await;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let conn_id = connection.id.clone();

    let hello = Frame::connection(serde_json::json!({ "connectionId": conn_id.as_str() }));
    if let Ok(json) = hello.encode() {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder: drains the connection's send channel.
    let outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx
                .send(Message::Text(text.as_str().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let text = match message {
            Message::Text(ref text) => Some(text.to_string()),
            Message::Binary(ref data) => std::str::from_utf8(data).ok().map(ToOwned::to_owned),
            Message::Close(_) => {
                info!(conn_id = %conn_id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };

        if let Some(reply) = router.handle_inbound(&text, &connection).await {
            if !connection.send_frame(&reply) {
                info!(conn_id = %conn_id, "failed to enqueue reply (channel full or closed)");
            }
        }
    }

    outbound.abort();
    let _ = router.disconnect(conn_id.as_str(), "client disconnect");
}

#[cfg(test)]
mod tests {
    // Full sessions need a live WebSocket and are covered by
    // tests/integration.rs; these pin the hello-frame shape.

    use pulse_core::{Frame, FrameType};

    #[test]
    fn hello_frame_carries_connection_id() {
        let frame = Frame::connection(serde_json::json!({ "connectionId": "c_9" }));
        assert_eq!(frame.frame_type, FrameType::Connection);
        let wire = frame.encode().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed["type"], "connection");
        assert_eq!(parsed["data"]["connectionId"], "c_9");
    }
}
