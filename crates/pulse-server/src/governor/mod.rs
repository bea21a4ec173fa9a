//! Resource monitoring, pool governance, leak detection, and alerting.

pub mod alerts;
pub mod governor;
pub mod leak;
pub mod monitor;
