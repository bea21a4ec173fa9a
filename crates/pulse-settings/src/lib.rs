//! # pulse-settings
//!
//! Configuration for the Pulse gateway with layered sources:
//!
//! 1. Compiled defaults ([`PulseSettings::default()`])
//! 2. `~/.pulse/settings.json`, deep-merged over the defaults
//! 3. `PULSE_*` environment variable overrides (highest priority)
//!
//! Every tunable the gateway reads — pool caps, heartbeat cadence,
//! governor thresholds, cache and queue sizing — lives here. Nothing is
//! hard-coded in the serving crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{
    CacheSettings, CacheStrategy, GovernorSettings, PulseSettings, QueueSettings, ServerSettings,
};
