//! End-to-end tests driving the gateway with a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use pulse_core::Frame;
use pulse_server::server::{INGRESS_QUEUE, PulseServer};
use pulse_settings::{PulseSettings, QueueSettings, ServerSettings};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn test_settings() -> PulseSettings {
    PulseSettings {
        server: ServerSettings {
            max_connections: 8,
            ..ServerSettings::default()
        },
        queue: QueueSettings {
            batch_size: 4,
            max_wait_ms: 50,
            workers: 2,
            ..QueueSettings::default()
        },
        ..PulseSettings::default()
    }
}

/// Boot a server on an ephemeral port and return the WS base URL.
async fn boot_server(settings: PulseSettings) -> (String, Arc<PulseServer>) {
    let server = Arc::new(PulseServer::new(settings));
    server.start();
    let app = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    }));
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Read frames until one of the wanted type arrives (skipping heartbeats
/// and other interleaved traffic).
async fn recv_frame_of(ws: &mut WsStream, frame_type: &str) -> Value {
    loop {
        let message = timeout(TIMEOUT, ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .expect("transport error");
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == frame_type {
                return value;
            }
        }
    }
}

async fn send_text(ws: &mut WsStream, text: &str) {
    timeout(TIMEOUT, ws.send(Message::Text(text.into())))
        .await
        .expect("send timed out")
        .expect("send failed");
}

#[tokio::test]
async fn connect_receives_connection_frame_with_id() {
    let (url, _server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;

    let hello = recv_frame_of(&mut ws, "connection").await;
    assert!(hello["data"]["connectionId"].is_string());
}

#[tokio::test]
async fn ping_yields_pong() {
    let (url, _server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    let _ = recv_frame_of(&mut ws, "connection").await;

    send_text(&mut ws, r#"{"type":"ping"}"#).await;
    let pong = recv_frame_of(&mut ws, "pong").await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn unknown_frame_type_gets_error_and_connection_survives() {
    let (url, _server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    let _ = recv_frame_of(&mut ws, "connection").await;

    send_text(&mut ws, r#"{"type":"warp_drive"}"#).await;
    let error = recv_frame_of(&mut ws, "error").await;
    assert_eq!(error["code"], "UNKNOWN_TYPE");

    // Still alive and serving.
    send_text(&mut ws, r#"{"type":"ping"}"#).await;
    let _ = recv_frame_of(&mut ws, "pong").await;
}

#[tokio::test]
async fn get_status_reports_live_counts() {
    let (url, _server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    let _ = recv_frame_of(&mut ws, "connection").await;

    send_text(&mut ws, r#"{"type":"get_status"}"#).await;
    let status = recv_frame_of(&mut ws, "connection").await;
    assert_eq!(status["data"]["connections"], 1);
    assert_eq!(status["data"]["maxConnections"], 8);
}

#[tokio::test]
async fn pool_full_rejects_with_typed_error() {
    let settings = PulseSettings {
        server: ServerSettings {
            max_connections: 1,
            ..ServerSettings::default()
        },
        ..test_settings()
    };
    let (url, _server) = boot_server(settings).await;

    let mut first = connect(&url).await;
    let _ = recv_frame_of(&mut first, "connection").await;

    let mut second = connect(&url).await;
    let error = recv_frame_of(&mut second, "error").await;
    assert_eq!(error["code"], "POOL_EXHAUSTED");
}

#[tokio::test]
async fn subject_broadcast_reaches_subject_connections() {
    let (url, server) = boot_server(test_settings()).await;
    let mut observer = connect(&format!("{url}?subject_id=task_7")).await;
    let _ = recv_frame_of(&mut observer, "connection").await;
    let mut bystander = connect(&format!("{url}?subject_id=task_8")).await;
    let _ = recv_frame_of(&mut bystander, "connection").await;

    let sent = server
        .broadcast()
        .broadcast_to_subject("task_7", &Frame::event("deployment_status", json!({"s": 1})));
    assert_eq!(sent, 1);

    let event = recv_frame_of(&mut observer, "event").await;
    assert_eq!(event["eventType"], "deployment_status");
    assert_eq!(event["data"]["s"], 1);
}

#[tokio::test]
async fn subscription_filter_scopes_event_broadcasts() {
    let (url, server) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{url}?subject_id=task_1")).await;
    let _ = recv_frame_of(&mut ws, "connection").await;

    send_text(
        &mut ws,
        r#"{"type":"subscribe","data":{"eventTypes":["alert_triggered"]}}"#,
    )
    .await;
    let _ = recv_frame_of(&mut ws, "connection").await;

    // Filtered out: zero deliveries.
    let sent = server
        .broadcast()
        .broadcast_to_subject("task_1", &Frame::event("deployment_status", json!({})));
    assert_eq!(sent, 0);

    // Matching event type gets through.
    let sent = server
        .broadcast()
        .broadcast_to_subject("task_1", &Frame::event("alert_triggered", json!({"n": 1})));
    assert_eq!(sent, 1);
    let event = recv_frame_of(&mut ws, "event").await;
    assert_eq!(event["eventType"], "alert_triggered");
}

#[tokio::test]
async fn published_progress_fans_out_through_the_batch_pipeline() {
    let (url, server) = boot_server(test_settings()).await;

    let mut publisher = connect(&format!("{url}?subject_id=task_3")).await;
    let _ = recv_frame_of(&mut publisher, "connection").await;
    let mut watcher = connect(&format!("{url}?subject_id=task_3")).await;
    let _ = recv_frame_of(&mut watcher, "connection").await;

    send_text(
        &mut publisher,
        r#"{"type":"progress_update","data":{"percent":75}}"#,
    )
    .await;

    // The batch processor drains the ingress queue and rebroadcasts to the
    // subject's connections.
    let update = recv_frame_of(&mut watcher, "progress_update").await;
    assert_eq!(update["data"]["percent"], 75);

    // The delivery result lands in the cache and the queue drains.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if server.cache().stats().entries > 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "result never cached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.queue().len(INGRESS_QUEUE), 0);
}

#[tokio::test]
async fn disconnect_removes_from_pool() {
    let (url, server) = boot_server(test_settings()).await;
    let mut ws = connect(&url).await;
    let _ = recv_frame_of(&mut ws, "connection").await;
    assert_eq!(server.broadcast().pool().count(), 1);

    timeout(TIMEOUT, ws.close(None))
        .await
        .expect("close timed out")
        .expect("close failed");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.broadcast().pool().count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection never removed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
