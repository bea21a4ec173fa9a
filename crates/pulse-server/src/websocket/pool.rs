//! Indexed registry of live connections.
//!
//! The pool is the sole owner of [`Connection`]s. Three indexes — primary
//! by id, secondary multimaps by subject and by owner — are guarded by one
//! lock so every mutation is atomic across all three: a reader can never
//! observe an id in a secondary index that is missing from the primary map.
//! No operation blocks on I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use pulse_core::ConnectionId;

use super::connection::Connection;

#[derive(Default)]
struct PoolInner {
    by_id: HashMap<String, Arc<Connection>>,
    by_subject: HashMap<String, HashSet<String>>,
    by_owner: HashMap<String, HashSet<String>>,
}

/// Bounded connection registry.
pub struct ConnectionPool {
    inner: RwLock<PoolInner>,
    max_size: usize,
}

impl ConnectionPool {
    /// Create a pool that holds at most `max_size` connections.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(PoolInner::default()),
            max_size,
        }
    }

    /// Register a connection in all indexes.
    ///
    /// Returns `false` — with no partial mutation — when the pool is already
    /// at capacity. Capacity is an expected condition under load, not an
    /// error.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.write();
        if inner.by_id.len() >= self.max_size {
            return false;
        }
        let id = connection.id.as_str().to_string();
        if let Some(subject) = &connection.subject_id {
            let _ = inner
                .by_subject
                .entry(subject.clone())
                .or_default()
                .insert(id.clone());
        }
        if let Some(owner) = &connection.owner_id {
            let _ = inner
                .by_owner
                .entry(owner.clone())
                .or_default()
                .insert(id.clone());
        }
        let _ = inner.by_id.insert(id, connection);
        true
    }

    /// Remove a connection from every index. Idempotent — returns `None`
    /// when the id is unknown.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let connection = inner.by_id.remove(id)?;
        if let Some(subject) = &connection.subject_id {
            if let Some(ids) = inner.by_subject.get_mut(subject) {
                let _ = ids.remove(id);
                if ids.is_empty() {
                    let _ = inner.by_subject.remove(subject);
                }
            }
        }
        if let Some(owner) = &connection.owner_id {
            if let Some(ids) = inner.by_owner.get_mut(owner) {
                let _ = ids.remove(id);
                if ids.is_empty() {
                    let _ = inner.by_owner.remove(owner);
                }
            }
        }
        Some(connection)
    }

    /// Look up one connection.
    pub fn by_id(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// All connections observing a subject.
    pub fn by_subject(&self, subject_id: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .by_subject
            .get(subject_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All connections belonging to an owner.
    pub fn by_owner(&self, owner_id: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .by_owner
            .get(owner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every live connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    /// Every live connection id.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.inner
            .read()
            .by_id
            .keys()
            .map(|id| ConnectionId::from(id.as_str()))
            .collect()
    }

    /// Live connection count.
    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Connections observing a subject.
    pub fn count_by_subject(&self, subject_id: &str) -> usize {
        self.inner
            .read()
            .by_subject
            .get(subject_id)
            .map_or(0, HashSet::len)
    }

    /// Connections belonging to an owner.
    pub fn count_by_owner(&self, owner_id: &str) -> usize {
        self.inner
            .read()
            .by_owner
            .get(owner_id)
            .map_or(0, HashSet::len)
    }

    /// Whether the pool is at capacity.
    pub fn is_full(&self) -> bool {
        self.count() >= self.max_size
    }

    /// Configured capacity.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::mpsc;

    fn make_connection(
        id: &str,
        subject: Option<&str>,
        owner: Option<&str>,
    ) -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Connection::new(
            ConnectionId::from(id),
            owner.map(Into::into),
            subject.map(Into::into),
            StdHashMap::new(),
            tx,
            4,
        ))
    }

    fn make_pool(max: usize) -> ConnectionPool {
        ConnectionPool::new(max)
    }

    #[test]
    fn add_and_count() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("c1", Some("t1"), Some("u1"))));
        assert!(pool.add(make_connection("c2", Some("t1"), Some("u2"))));
        assert_eq!(pool.count(), 2);
        assert_eq!(pool.count_by_subject("t1"), 2);
        assert_eq!(pool.count_by_owner("u1"), 1);
    }

    #[test]
    fn add_at_capacity_fails_without_mutation() {
        let pool = make_pool(2);
        assert!(pool.add(make_connection("c1", Some("t1"), None)));
        assert!(pool.add(make_connection("c2", Some("t1"), None)));
        assert!(!pool.add(make_connection("c3", Some("t2"), Some("u3"))));
        assert_eq!(pool.count(), 2);
        assert_eq!(pool.count_by_subject("t2"), 0);
        assert_eq!(pool.count_by_owner("u3"), 0);
        assert!(pool.is_full());
    }

    #[test]
    fn remove_erases_all_indexes() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("c1", Some("t1"), Some("u1"))));
        let removed = pool.remove("c1");
        assert!(removed.is_some());
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.count_by_subject("t1"), 0);
        assert_eq!(pool.count_by_owner("u1"), 0);
        assert!(pool.by_id("c1").is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("c1", None, None)));
        assert!(pool.remove("c1").is_some());
        assert!(pool.remove("c1").is_none());
        assert!(pool.remove("never_added").is_none());
    }

    #[test]
    fn secondary_indexes_subset_of_primary() {
        let pool = make_pool(100);
        for i in 0..20 {
            let subject = if i % 2 == 0 { Some("even") } else { Some("odd") };
            let owner = if i % 3 == 0 { Some("trio") } else { None };
            assert!(pool.add(make_connection(&format!("c{i}"), subject, owner)));
        }
        let _ = pool.remove("c4");
        let _ = pool.remove("c9");

        for conn in pool.by_subject("even") {
            assert!(pool.by_id(conn.id.as_str()).is_some());
        }
        for conn in pool.by_owner("trio") {
            assert!(pool.by_id(conn.id.as_str()).is_some());
        }
        assert_eq!(pool.count(), 18);
    }

    #[test]
    fn count_tracks_adds_minus_removes() {
        let pool = make_pool(50);
        let mut added = 0;
        for i in 0..30 {
            if pool.add(make_connection(&format!("c{i}"), None, None)) {
                added += 1;
            }
        }
        let mut removed = 0;
        for i in 0..10 {
            if pool.remove(&format!("c{i}")).is_some() {
                removed += 1;
            }
        }
        assert_eq!(pool.count(), added - removed);
    }

    #[test]
    fn by_subject_unknown_is_empty() {
        let pool = make_pool(10);
        assert!(pool.by_subject("ghost").is_empty());
        assert!(pool.by_owner("ghost").is_empty());
    }

    #[test]
    fn connections_without_subject_skip_secondary_index() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("c1", None, None)));
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.count_by_subject(""), 0);
        assert!(pool.by_id("c1").is_some());
    }

    #[test]
    fn ids_lists_everything() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("a", None, None)));
        assert!(pool.add(make_connection("b", None, None)));
        let mut ids: Vec<String> = pool.ids().iter().map(ToString::to_string).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_subject_set_is_dropped_on_last_removal() {
        let pool = make_pool(10);
        assert!(pool.add(make_connection("c1", Some("t1"), None)));
        assert!(pool.add(make_connection("c2", Some("t1"), None)));
        let _ = pool.remove("c1");
        assert_eq!(pool.count_by_subject("t1"), 1);
        let _ = pool.remove("c2");
        assert_eq!(pool.count_by_subject("t1"), 0);
        assert!(pool.by_subject("t1").is_empty());
    }
}
