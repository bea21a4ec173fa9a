//! # pulse-cache
//!
//! Bounded in-memory cache with pluggable eviction (LRU / LFU / FIFO / TTL),
//! lazy per-entry TTL expiry, and hit/miss/eviction accounting. Used to
//! memoize batch-processing results and arbitrary lookups.
//!
//! Both caps — entry count and total memory — hold after every mutation:
//! `set` evicts one victim at a time (per the configured strategy) until the
//! new entry fits.

#![deny(unsafe_code)]

mod cache;
mod entry;

pub use cache::{CacheStats, IntelligentCache};
pub use entry::CacheEntry;
pub use pulse_settings::{CacheSettings, CacheStrategy};
