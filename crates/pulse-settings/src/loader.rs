//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{CacheStrategy, PulseSettings};

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers and floats must parse and fall within range; invalid values are
/// logged and ignored (falling back to file/default).
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("PULSE_PORT", 0, 65_535) {
        #[allow(clippy::cast_possible_truncation)]
        {
            settings.server.port = v as u16;
        }
    }
    if let Some(v) = read_env_usize("PULSE_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_u64("PULSE_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_u64("PULSE_CONNECTION_TIMEOUT_SECS", 1, 86_400) {
        settings.server.connection_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("PULSE_CLEANUP_INTERVAL_SECS", 0, 86_400) {
        settings.server.cleanup_interval_secs = v;
    }

    // ── Governor ────────────────────────────────────────────────────
    if let Some(v) = read_env_f64("PULSE_MEMORY_LIMIT_MB", 1.0, 1_048_576.0) {
        settings.governor.memory_limit_mb = v;
    }
    if let Some(v) = read_env_f64("PULSE_CPU_THRESHOLD_PERCENT", 1.0, 100.0) {
        settings.governor.cpu_threshold_percent = v;
    }
    if let Some(v) = read_env_usize("PULSE_MIN_CONNECTIONS", 0, 1_000_000) {
        settings.governor.min_connections = v;
    }

    // ── Cache ───────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("PULSE_CACHE_MAX_ENTRIES", 1, 10_000_000) {
        settings.cache.max_entries = v;
    }
    if let Some(v) = read_env_f64("PULSE_CACHE_MAX_MEMORY_MB", 0.001, 1_048_576.0) {
        settings.cache.max_memory_mb = v;
    }
    if let Some(v) = read_env_string("PULSE_CACHE_STRATEGY") {
        match v.parse::<CacheStrategy>() {
            Ok(strategy) => settings.cache.strategy = strategy,
            Err(_) => {
                tracing::warn!(value = %v, "invalid PULSE_CACHE_STRATEGY, ignoring");
            }
        }
    }

    // ── Queue ───────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("PULSE_QUEUE_MAX_SIZE", 1, 10_000_000) {
        settings.queue.max_size = v;
    }
    if let Some(v) = read_env_usize("PULSE_QUEUE_BATCH_SIZE", 1, 100_000) {
        settings.queue.batch_size = v;
    }
    if let Some(v) = read_env_usize("PULSE_QUEUE_WORKERS", 1, 1024) {
        settings.queue.workers = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = val.parse::<u64>().ok().filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = val
        .parse::<usize>()
        .ok()
        .filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = val
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}
