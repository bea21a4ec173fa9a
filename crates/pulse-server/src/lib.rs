//! # pulse-server
//!
//! The real-time connection and resource-governance layer:
//!
//! - **WebSocket gateway**: connection pool with subject/owner indexes,
//!   typed frame dispatch, scoped broadcasts with partial-failure counting,
//!   heartbeat and idle-cleanup loops
//! - **Governance**: resource monitor (CPU/memory/connections/queue),
//!   health-classifying pool governor with emergency cleanup and
//!   scale-down, generic resource-leak detection with an alert pipeline
//! - **Plumbing**: `/health`, Prometheus `/metrics`, graceful shutdown via
//!   `CancellationToken`, and the `pulsed` composition-root binary

#![deny(unsafe_code)]

pub mod governor;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
