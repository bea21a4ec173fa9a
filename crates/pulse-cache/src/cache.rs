//! The cache proper: bounded map with strategy-driven eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use pulse_settings::{CacheSettings, CacheStrategy};

use crate::entry::CacheEntry;

/// Point-in-time cache counters.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing (including lazy expirations).
    pub misses: u64,
    /// Entries removed to satisfy a cap.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Current live entry count.
    pub entries: usize,
    /// Current total serialized size of live entries.
    pub memory_bytes: usize,
    /// `hits / (hits + misses)`, or 0 when no reads happened.
    pub hit_rate: f64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    memory_bytes: usize,
    next_seq: u64,
}

/// Bounded multi-strategy cache over JSON values.
///
/// All operations take a single short-lived mutex; nothing blocks on I/O.
pub struct IntelligentCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    max_memory_bytes: usize,
    default_ttl: Option<Duration>,
    strategy: CacheStrategy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl IntelligentCache {
    /// Create a cache from settings.
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let max_memory_bytes = (settings.max_memory_mb * 1024.0 * 1024.0) as usize;
        let default_ttl = if settings.default_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(settings.default_ttl_secs))
        };
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                memory_bytes: 0,
                next_seq: 0,
            }),
            max_entries: settings.max_entries,
            max_memory_bytes,
            default_ttl,
            strategy: settings.strategy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Look up a value.
    ///
    /// An entry whose TTL has elapsed is removed here and counted as a miss
    /// (lazy expiry on read).
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();

        if inner.entries.get(key).is_some_and(CacheEntry::is_expired) {
            if let Some(entry) = inner.entries.remove(key) {
                inner.memory_bytes -= entry.size_bytes;
            }
            let _ = self.expirations.fetch_add(1, Ordering::Relaxed);
            let _ = self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                let _ = self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                let _ = self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value.
    ///
    /// Evicts one entry at a time per the configured strategy until both the
    /// entry-count cap and the memory cap are satisfied, then inserts.
    /// Returns `false` only when the value alone exceeds the memory cap and
    /// can never fit.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) -> bool {
        let key = key.into();
        let size_bytes = serde_json::to_vec(&value).map_or(0, |bytes| bytes.len());
        if size_bytes > self.max_memory_bytes {
            debug!(key, size_bytes, "value exceeds cache memory cap, rejected");
            return false;
        }
        let ttl = ttl.or(self.default_ttl);

        let mut inner = self.inner.lock();

        // Replacing an existing key frees its budget first.
        if let Some(old) = inner.entries.remove(&key) {
            inner.memory_bytes -= old.size_bytes;
        }

        while inner.entries.len() >= self.max_entries
            || inner.memory_bytes + size_bytes > self.max_memory_bytes
        {
            let Some(victim) = self.select_victim(&inner) else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&victim) {
                inner.memory_bytes -= evicted.size_bytes;
                let _ = self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, strategy = ?self.strategy, "evicted cache entry");
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let _ = inner
            .entries
            .insert(key, CacheEntry::new(value, size_bytes, seq, ttl));
        inner.memory_bytes += size_bytes;
        true
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(key) {
            Some(entry) => {
                inner.memory_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    /// Current live entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total serialized size of live entries.
    pub fn memory_bytes(&self) -> usize {
        self.inner.lock().memory_bytes
    }

    /// Counter snapshot with the derived hit rate.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            memory_bytes: inner.memory_bytes,
            hit_rate,
        }
    }

    /// Pick the next eviction victim per the configured strategy.
    ///
    /// Each rule is a pure selection over the live entry set; ties break by
    /// insertion order so eviction is deterministic.
    fn select_victim(&self, inner: &CacheInner) -> Option<String> {
        let entries = &inner.entries;
        let victim = match self.strategy {
            CacheStrategy::Lru => entries
                .iter()
                .min_by_key(|(_, e)| (e.last_accessed_at, e.created_seq)),
            CacheStrategy::Lfu => entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.created_seq)),
            // TTL has no strict expiry ordering across mixed TTLs; oldest
            // creation first is the fallback, which coincides with FIFO.
            CacheStrategy::Fifo | CacheStrategy::Ttl => entries
                .iter()
                .min_by_key(|(_, e)| (e.created_at, e.created_seq)),
        };
        victim.map(|(key, _)| key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(max_entries: usize, strategy: CacheStrategy) -> IntelligentCache {
        IntelligentCache::new(&CacheSettings {
            max_entries,
            max_memory_mb: 1.0,
            default_ttl_secs: 0,
            strategy,
        })
    }

    #[test]
    fn get_miss_on_empty() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn set_then_get() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!({"v": 1}), None));
        assert_eq!(cache.get("k").unwrap()["v"], 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        // Capacity 2: set a, set b, read a, set c => b evicted.
        let cache = cache_with(2, CacheStrategy::Lru);
        assert!(cache.set("a", json!(1), None));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.set("b", json!(2), None));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("a").is_some());
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.set("c", json!(3), None));

        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").unwrap(), json!(1));
        assert_eq!(cache.get("c").unwrap(), json!(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn lfu_evicts_least_frequent_with_insertion_tie_break() {
        let cache = cache_with(2, CacheStrategy::Lfu);
        assert!(cache.set("a", json!(1), None));
        assert!(cache.set("b", json!(2), None));
        // a read twice, b never
        assert!(cache.get("a").is_some());
        assert!(cache.get("a").is_some());
        assert!(cache.set("c", json!(3), None));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());

        // Tie case: neither read; the earlier insertion goes first.
        let cache = cache_with(2, CacheStrategy::Lfu);
        assert!(cache.set("first", json!(1), None));
        assert!(cache.set("second", json!(2), None));
        assert!(cache.set("third", json!(3), None));
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
    }

    #[test]
    fn fifo_evicts_oldest_created() {
        let cache = cache_with(2, CacheStrategy::Fifo);
        assert!(cache.set("a", json!(1), None));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.set("b", json!(2), None));
        // Reading a does not save it under FIFO.
        assert!(cache.get("a").is_some());
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.set("c", json!(3), None));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn ttl_expiry_counts_as_miss_and_removes() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!("v"), Some(Duration::from_millis(20))));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.memory_bytes, 0);
    }

    #[test]
    fn unexpired_ttl_still_hits() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!("v"), Some(Duration::from_secs(60))));
        assert_eq!(cache.get("k").unwrap(), json!("v"));
    }

    #[test]
    fn caps_hold_after_every_mutation() {
        let cache = cache_with(5, CacheStrategy::Lru);
        for i in 0..50 {
            assert!(cache.set(format!("key_{i}"), json!({"i": i}), None));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.stats().evictions, 45);
    }

    #[test]
    fn memory_cap_drives_eviction() {
        // ~100 bytes per value, cap well below 10 of them.
        let cache = IntelligentCache::new(&CacheSettings {
            max_entries: 1000,
            max_memory_mb: 0.0005, // ~524 bytes
            default_ttl_secs: 0,
            strategy: CacheStrategy::Fifo,
        });
        let filler = "x".repeat(90);
        for i in 0..10 {
            assert!(cache.set(format!("k{i}"), json!({ "data": filler }), None));
            assert!(cache.memory_bytes() <= 524);
        }
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn oversized_value_rejected_without_mutation() {
        let cache = IntelligentCache::new(&CacheSettings {
            max_entries: 10,
            max_memory_mb: 0.00001, // ~10 bytes
            default_ttl_secs: 0,
            strategy: CacheStrategy::Lru,
        });
        assert!(!cache.set("big", json!({"payload": "far too large to fit"}), None));
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_key_does_not_double_count_memory() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!("aaaaaaaaaa"), None));
        let first = cache.memory_bytes();
        assert!(cache.set("k", json!("aaaaaaaaaa"), None));
        assert_eq!(cache.memory_bytes(), first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_returns_presence() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!(1), None));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.memory_bytes(), 0);
    }

    #[test]
    fn clear_resets_contents_not_counters() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!(1), None));
        let _ = cache.get("k");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn hit_rate_derivation() {
        let cache = cache_with(10, CacheStrategy::Lru);
        assert!(cache.set("k", json!(1), None));
        let _ = cache.get("k");
        let _ = cache.get("k");
        let _ = cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn default_ttl_applies_when_unset() {
        let cache = IntelligentCache::new(&CacheSettings {
            max_entries: 10,
            max_memory_mb: 1.0,
            default_ttl_secs: 1,
            strategy: CacheStrategy::Lru,
        });
        assert!(cache.set("k", json!(1), None));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("k").is_none());
    }
}
