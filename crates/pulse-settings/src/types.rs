//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON is accepted — missing fields get their production default
//! during deserialization.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Root settings type for the Pulse gateway.
///
/// Loaded from `~/.pulse/settings.json` with defaults applied for missing
/// fields. `PULSE_*` environment variables override specific values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Connection handling and heartbeat cadence.
    pub server: ServerSettings,
    /// Health classification and remediation thresholds.
    pub governor: GovernorSettings,
    /// Result/lookup cache sizing and eviction.
    pub cache: CacheSettings,
    /// Ingress priority queue and batch processing.
    pub queue: QueueSettings,
}

/// Server network, pool, and heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent connections held by the pool.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Idle timeout: a connection with no heartbeat for this long is closed.
    pub connection_timeout_secs: u64,
    /// Idle-cleanup interval in seconds. `0` derives 2x the heartbeat interval.
    pub cleanup_interval_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection diagnostic ring buffer capacity.
    pub recent_messages_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            connection_timeout_secs: 90,
            cleanup_interval_secs: 0,
            max_message_size: 1024 * 1024,
            recent_messages_capacity: 16,
        }
    }
}

impl ServerSettings {
    /// Effective cleanup interval: configured value, or 2x heartbeat when 0.
    #[must_use]
    pub fn effective_cleanup_interval_secs(&self) -> u64 {
        if self.cleanup_interval_secs == 0 {
            self.heartbeat_interval_secs * 2
        } else {
            self.cleanup_interval_secs
        }
    }
}

/// Governor and resource-monitor thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernorSettings {
    /// Interval between health-check/cleanup ticks in seconds.
    pub health_check_interval_secs: u64,
    /// Process memory limit in MB; exceeding it is a critical violation.
    pub memory_limit_mb: f64,
    /// CPU usage threshold in percent; exceeding it is a critical violation.
    pub cpu_threshold_percent: f64,
    /// Scale down when `active / max_connections` falls below this.
    pub scale_down_utilization: f64,
    /// Prepare extra capacity when utilization exceeds this.
    pub scale_up_utilization: f64,
    /// Never scale below this many connections.
    pub min_connections: usize,
    /// Max connections force-closed per emergency-cleanup tick.
    pub emergency_batch_size: usize,
    /// Resource considered leaked when unseen for this long (seconds).
    pub leak_timeout_secs: u64,
    /// Minimum access count below which an aged resource is suspect.
    pub leak_min_count: u64,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            memory_limit_mb: 1024.0,
            cpu_threshold_percent: 80.0,
            scale_down_utilization: 0.3,
            scale_up_utilization: 0.8,
            min_connections: 10,
            emergency_batch_size: 50,
            leak_timeout_secs: 300,
            leak_min_count: 1,
        }
    }
}

/// Cache eviction strategy selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Evict the least-recently-used entry.
    #[default]
    Lru,
    /// Evict the least-frequently-used entry (ties by insertion order).
    Lfu,
    /// Evict the oldest entry by creation time.
    Fifo,
    /// Evict the entry closest to expiry (oldest-first fallback).
    Ttl,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "ttl" => Ok(Self::Ttl),
            other => Err(format!("unknown cache strategy: {other}")),
        }
    }
}

/// Cache sizing and eviction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// Maximum total memory held by live entries, in MB.
    pub max_memory_mb: f64,
    /// Default TTL applied when `set` is called without one. `0` = none.
    pub default_ttl_secs: u64,
    /// Eviction strategy.
    pub strategy: CacheStrategy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_mb: 100.0,
            default_ttl_secs: 0,
            strategy: CacheStrategy::Lru,
        }
    }
}

/// Priority queue and batch-processor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Per-queue capacity; enqueue beyond it is rejected.
    pub max_size: usize,
    /// Target batch size for the processor.
    pub batch_size: usize,
    /// Max time to wait filling a batch, in milliseconds.
    pub max_wait_ms: u64,
    /// Worker-pool width for batch processing.
    pub workers: usize,
    /// TTL for cached processing results, in seconds.
    pub result_ttl_secs: u64,
    /// TTL applied to enqueued messages, in seconds.
    pub message_ttl_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            batch_size: 50,
            max_wait_ms: 1000,
            workers: 4,
            result_ttl_secs: 300,
            message_ttl_secs: 60,
        }
    }
}
