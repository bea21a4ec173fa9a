//! Message priority classes for the ingress queue.

use serde::{Deserialize, Serialize};

/// Priority of a queued message. Lower rank pops first.
///
/// Priority strictly dominates arrival order: a `Critical` message enqueued
/// after a `Low` one is still delivered first. Within a class, arrival order
/// is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    /// Must be delivered ahead of everything else (alerts, shutdown notices).
    Critical,
    /// Elevated priority (e.g. error log lines).
    High,
    /// Default priority for progress and notification traffic.
    Normal,
    /// Best-effort traffic (metrics samples, diagnostics).
    Low,
}

impl MessagePriority {
    /// Numeric rank: lower value = higher priority.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}
