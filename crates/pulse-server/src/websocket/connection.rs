//! One live client connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use pulse_core::{ConnectionId, Frame};

/// A connected client session.
///
/// Owned exclusively by the pool; the router and governor reference it only
/// through `Arc`s handed out by pool lookups. `last_heartbeat` never runs
/// ahead of the clock, and a connection marked dead is on its way out of
/// the pool.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Principal this connection belongs to, if any (per-owner broadcast).
    pub owner_id: Option<String>,
    /// Entity this connection observes, if any (per-subject broadcast).
    pub subject_id: Option<String>,
    /// When the connection was accepted.
    pub created_at: Instant,
    /// Caller-supplied string metadata.
    pub metadata: HashMap<String, String>,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Refreshed on every heartbeat, send, and receive.
    last_heartbeat: Mutex<Instant>,
    /// Cleared when the connection is being removed.
    is_alive: AtomicBool,
    /// Event-type filter. Empty = receive every event.
    subscriptions: Mutex<HashSet<String>>,
    /// Most recent frame summaries, diagnostics only — never replay.
    recent_messages: Mutex<VecDeque<String>>,
    recent_capacity: usize,
    /// Messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a new connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        owner_id: Option<String>,
        subject_id: Option<String>,
        metadata: HashMap<String, String>,
        tx: mpsc::Sender<Arc<String>>,
        recent_capacity: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            owner_id,
            subject_id,
            created_at: now,
            metadata,
            tx,
            last_heartbeat: Mutex::new(now),
            is_alive: AtomicBool::new(true),
            subscriptions: Mutex::new(HashSet::new()),
            recent_messages: Mutex::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Send raw text to the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            self.touch_heartbeat();
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and send a frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        match frame.encode() {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Refresh the heartbeat timestamp.
    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the last heartbeat/send/receive.
    pub fn idle_time(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the connection is still considered live.
    pub fn alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Mark the connection live (activity observed).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        self.touch_heartbeat();
    }

    /// Mark the connection dead; it is being removed from the pool.
    pub fn mark_dead(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
    }

    /// Narrow the event filter to include the given event types.
    pub fn subscribe<I: IntoIterator<Item = String>>(&self, event_types: I) {
        let mut subs = self.subscriptions.lock();
        subs.extend(event_types);
    }

    /// Remove event types from the filter. An empty filter receives all.
    pub fn unsubscribe<'a, I: IntoIterator<Item = &'a str>>(&self, event_types: I) {
        let mut subs = self.subscriptions.lock();
        for event_type in event_types {
            let _ = subs.remove(event_type);
        }
    }

    /// Current subscription list.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Whether an `event` frame of this type passes the filter.
    pub fn wants_event(&self, event_type: &str) -> bool {
        let subs = self.subscriptions.lock();
        subs.is_empty() || subs.contains(event_type)
    }

    /// Record a frame summary in the diagnostics ring buffer.
    pub fn record_recent(&self, summary: impl Into<String>) {
        if self.recent_capacity == 0 {
            return;
        }
        let mut recent = self.recent_messages.lock();
        if recent.len() == self.recent_capacity {
            let _ = recent.pop_front();
        }
        recent.push_back(summary.into());
    }

    /// Snapshot of the diagnostics ring buffer, oldest first.
    pub fn recent_messages(&self) -> Vec<String> {
        self.recent_messages.lock().iter().cloned().collect()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_connection() -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = Connection::new(
            ConnectionId::from("conn_1"),
            Some("owner_a".into()),
            Some("task_1".into()),
            HashMap::new(),
            tx,
            4,
        );
        (Arc::new(conn), rx)
    }

    #[test]
    fn new_connection_is_alive_and_fresh() {
        let (conn, _rx) = make_connection();
        assert!(conn.alive());
        assert!(conn.idle_time() < Duration::from_secs(1));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_delivers_text() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_counts_drop() {
        let (tx, rx) = mpsc::channel(32);
        let conn = Connection::new(
            ConnectionId::from("conn_2"),
            None,
            None,
            HashMap::new(),
            tx,
            4,
        );
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_returns_false() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(
            ConnectionId::from("conn_3"),
            None,
            None,
            HashMap::new(),
            tx,
            4,
        );
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_frame_encodes_wire_json() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_frame(&Frame::event("deployment_status", json!({"ok": true}))));
        let text = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "event");
        assert_eq!(parsed["eventType"], "deployment_status");
    }

    #[test]
    fn successful_send_refreshes_heartbeat() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        let idle_before = conn.idle_time();
        assert!(conn.send(Arc::new("x".into())));
        assert!(conn.idle_time() < idle_before);
    }

    #[test]
    fn mark_dead_then_alive() {
        let (conn, _rx) = make_connection();
        conn.mark_dead();
        assert!(!conn.alive());
        conn.mark_alive();
        assert!(conn.alive());
    }

    #[test]
    fn empty_filter_receives_everything() {
        let (conn, _rx) = make_connection();
        assert!(conn.wants_event("deployment_status"));
        assert!(conn.wants_event("anything_at_all"));
    }

    #[test]
    fn subscribe_narrows_the_filter() {
        let (conn, _rx) = make_connection();
        conn.subscribe(vec!["alert_triggered".to_string()]);
        assert!(conn.wants_event("alert_triggered"));
        assert!(!conn.wants_event("deployment_status"));
    }

    #[test]
    fn unsubscribe_back_to_empty_receives_all() {
        let (conn, _rx) = make_connection();
        conn.subscribe(vec!["alert_triggered".to_string()]);
        conn.unsubscribe(["alert_triggered"]);
        assert!(conn.wants_event("deployment_status"));
    }

    #[test]
    fn recent_ring_buffer_keeps_most_recent() {
        let (conn, _rx) = make_connection();
        for i in 0..6 {
            conn.record_recent(format!("frame_{i}"));
        }
        let recent = conn.recent_messages();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent.first().unwrap(), "frame_2");
        assert_eq!(recent.last().unwrap(), "frame_5");
    }

    #[test]
    fn zero_capacity_ring_records_nothing() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = Connection::new(
            ConnectionId::from("conn_4"),
            None,
            None,
            HashMap::new(),
            tx,
            0,
        );
        conn.record_recent("frame");
        assert!(conn.recent_messages().is_empty());
    }

    #[test]
    fn age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > age1);
    }
}
