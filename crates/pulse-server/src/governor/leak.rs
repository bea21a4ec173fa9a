//! Generic named-resource leak tracking and classification.
//!
//! Independent of connections: anything with an id can be tracked. A
//! resource unseen for longer than the timeout is classified as leaked,
//! with severity escalating as it ages past 1.5x and 2x the timeout.
//! Detection never reclaims the resource — forced reclamation of an
//! unknown resource type is unsafe; the alert pipeline only reports.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// Leak records are pruned this long after their last detection.
const LEAK_RETENTION: Duration = Duration::from_secs(3600);

/// How many leaks `report` lists.
const REPORT_RECENT: usize = 10;

/// Leak severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakLevel {
    /// Informational only.
    Info,
    /// Age above 1.5x the timeout.
    Warning,
    /// Age above the timeout.
    Error,
    /// Age above 2x the timeout.
    Critical,
}

/// One detected leak, upserted across detection passes.
#[derive(Clone, Debug)]
pub struct ResourceLeak {
    /// Resource category (e.g. `"connection"`, `"file_handle"`).
    pub resource_type: String,
    /// The leaked resource's id.
    pub resource_id: String,
    /// Current severity. Escalates as the resource ages.
    pub level: LeakLevel,
    /// When the leak was first detected.
    pub first_detected: Instant,
    /// When the leak was last detected.
    pub last_detected: Instant,
    /// How many detection passes have flagged it.
    pub occurrence_count: u64,
}

struct TrackedResource {
    resource_type: String,
    #[allow(dead_code)]
    metadata: HashMap<String, String>,
    created_at: Instant,
    last_seen: Instant,
    access_count: u64,
}

/// Aggregated view of current leaks.
#[derive(Clone, Debug, Default)]
pub struct LeakReport {
    /// Total live leak records.
    pub total: usize,
    /// Leak counts per resource type.
    pub by_type: HashMap<String, u64>,
    /// Leak counts per severity.
    pub by_level: HashMap<LeakLevel, u64>,
    /// The most recently detected leaks, newest first.
    pub recent: Vec<ResourceLeak>,
}

/// Tracks named resources and classifies the ones that were never released.
pub struct ResourceLeakDetector {
    tracked: Mutex<HashMap<String, TrackedResource>>,
    leaks: Mutex<HashMap<String, ResourceLeak>>,
}

impl ResourceLeakDetector {
    /// Create an empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(HashMap::new()),
            leaks: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a resource.
    pub fn track(
        &self,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
        metadata: HashMap<String, String>,
    ) {
        let now = Instant::now();
        let _ = self.tracked.lock().insert(
            resource_id.into(),
            TrackedResource {
                resource_type: resource_type.into(),
                metadata,
                created_at: now,
                last_seen: now,
                access_count: 0,
            },
        );
    }

    /// Record activity on a resource. Returns `false` for unknown ids.
    pub fn touch(&self, resource_id: &str) -> bool {
        let mut tracked = self.tracked.lock();
        match tracked.get_mut(resource_id) {
            Some(resource) => {
                resource.last_seen = Instant::now();
                resource.access_count += 1;
                true
            }
            None => false,
        }
    }

    /// Stop tracking a released resource. Returns `false` for unknown ids.
    pub fn release(&self, resource_id: &str) -> bool {
        self.tracked.lock().remove(resource_id).is_some()
    }

    /// Number of currently tracked resources.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Run one detection pass.
    ///
    /// A resource leaks when both its age and its idle time exceed
    /// `timeout`. Each pass upserts the leak record (bumping
    /// `occurrence_count` on repeats) and recomputes severity from age.
    /// Records untouched for an hour are pruned first. The returned list
    /// contains the leaks flagged by this pass with at least `min_count`
    /// occurrences.
    pub fn detect_leaks(&self, timeout: Duration, min_count: u64) -> Vec<ResourceLeak> {
        let now = Instant::now();
        let mut leaks = self.leaks.lock();
        leaks.retain(|_, leak| now.duration_since(leak.last_detected) <= LEAK_RETENTION);

        let tracked = self.tracked.lock();
        let mut detected = Vec::new();
        for (resource_id, resource) in tracked.iter() {
            let age = now.duration_since(resource.created_at);
            let idle = now.duration_since(resource.last_seen);
            if age <= timeout || idle <= timeout {
                continue;
            }
            let level = classify_level(age, timeout);
            let leak = leaks
                .entry(resource_id.clone())
                .and_modify(|leak| {
                    leak.occurrence_count += 1;
                    leak.last_detected = now;
                    leak.level = level;
                })
                .or_insert_with(|| ResourceLeak {
                    resource_type: resource.resource_type.clone(),
                    resource_id: resource_id.clone(),
                    level,
                    first_detected: now,
                    last_detected: now,
                    occurrence_count: 1,
                });
            debug!(
                resource_id,
                resource_type = leak.resource_type,
                level = ?leak.level,
                occurrences = leak.occurrence_count,
                idle_secs = idle.as_secs(),
                "leak detected"
            );
            if leak.occurrence_count >= min_count {
                detected.push(leak.clone());
            }
        }
        detected
    }

    /// Aggregate counts by type and level plus the most recent leaks.
    pub fn report(&self) -> LeakReport {
        let leaks = self.leaks.lock();
        let mut report = LeakReport {
            total: leaks.len(),
            ..LeakReport::default()
        };
        for leak in leaks.values() {
            *report.by_type.entry(leak.resource_type.clone()).or_insert(0) += 1;
            *report.by_level.entry(leak.level).or_insert(0) += 1;
        }
        let mut recent: Vec<ResourceLeak> = leaks.values().cloned().collect();
        recent.sort_by(|a, b| b.last_detected.cmp(&a.last_detected));
        recent.truncate(REPORT_RECENT);
        report.recent = recent;
        report
    }
}

impl Default for ResourceLeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity from age relative to the timeout: error, then warning past
/// 1.5x, then critical past 2x.
fn classify_level(age: Duration, timeout: Duration) -> LeakLevel {
    if age > timeout * 2 {
        LeakLevel::Critical
    } else if age > timeout.mul_f64(1.5) {
        LeakLevel::Warning
    } else {
        LeakLevel::Error
    }
}
