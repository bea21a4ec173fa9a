//! Cache entry bookkeeping.

use std::time::{Duration, Instant};

use serde_json::Value;

/// One live cache entry.
///
/// `created_seq` is a monotonic insertion counter used as the deterministic
/// tie-break for LFU and as the FIFO ordering key when two entries share a
/// creation instant.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Cached value.
    pub value: Value,
    /// Serialized size of the value in bytes.
    pub size_bytes: usize,
    /// When the entry was inserted.
    pub created_at: Instant,
    /// Monotonic insertion sequence number.
    pub created_seq: u64,
    /// When the entry was last read.
    pub last_accessed_at: Instant,
    /// Number of reads since insertion.
    pub access_count: u64,
    /// Optional time-to-live measured from `created_at`.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(value: Value, size_bytes: usize, created_seq: u64, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            size_bytes,
            created_at: now,
            created_seq,
            last_accessed_at: now,
            access_count: 0,
            ttl,
        }
    }

    /// Whether the entry's TTL has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.ttl
            .is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }

    /// Record a read: refresh `last_accessed_at` and bump the counter.
    pub fn touch(&mut self) {
        self.last_accessed_at = Instant::now();
        self.access_count = self.access_count.saturating_add(1);
    }
}
