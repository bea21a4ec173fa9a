//! CPU / memory / connection / queue sampling and threshold checks.
//!
//! Memory is the process resident set in MB. The bandwidth estimate is
//! derived from cumulative OS network counters between samples; it is a
//! coarse diagnostic signal only and feeds no correctness-affecting
//! decision.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};
use tracing::debug;

use pulse_settings::GovernorSettings;

/// Samples kept for windowed queries.
const HISTORY_CAP: usize = 1000;

/// One resource sample.
#[derive(Clone, Debug)]
pub struct ResourceMetrics {
    /// Global CPU usage, 0–100.
    pub cpu_percent: f64,
    /// Process resident-set memory in MB.
    pub memory_mb: f64,
    /// Resident set as a share of total system memory, 0–100.
    pub memory_percent: f64,
    /// Live connection count at sample time.
    pub active_connections: usize,
    /// Total queued messages at sample time.
    pub queued_messages: usize,
    /// Coarse network throughput estimate. Diagnostic only.
    pub estimated_bandwidth_mbps: f64,
}

/// Outcome of a threshold check.
#[derive(Clone, Debug, Default)]
pub struct ThresholdReport {
    /// Whether any hard threshold was breached.
    pub is_critical: bool,
    /// One human-readable warning per breached threshold.
    pub warnings: Vec<String>,
}

/// Windowed average over recent samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowAverage {
    /// Mean CPU usage over the window.
    pub cpu_percent: f64,
    /// Mean resident-set MB over the window.
    pub memory_mb: f64,
}

/// Samples system metrics and evaluates governor thresholds.
pub struct ResourceMonitor {
    system: Mutex<System>,
    networks: Mutex<Networks>,
    pid: Option<Pid>,
    total_memory_mb: f64,
    last_net: Mutex<Option<(Instant, u64)>>,
    history: Mutex<VecDeque<ResourceMetrics>>,
    settings: GovernorSettings,
    max_connections: usize,
    queue_capacity: usize,
}

impl ResourceMonitor {
    /// Create a monitor.
    ///
    /// `max_connections` and `queue_capacity` are the caps the
    /// connection-ratio and queue-ratio checks are evaluated against.
    #[must_use]
    pub fn new(
        settings: GovernorSettings,
        max_connections: usize,
        queue_capacity: usize,
    ) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        #[allow(clippy::cast_precision_loss)]
        let total_memory_mb = system.total_memory() as f64 / (1024.0 * 1024.0);
        Self {
            system: Mutex::new(system),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            pid: sysinfo::get_current_pid().ok(),
            total_memory_mb,
            last_net: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            settings,
            max_connections,
            queue_capacity,
        }
    }

    /// Take a sample and append it to the bounded history.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&self, active_connections: usize, queued_messages: usize) -> ResourceMetrics {
        let (cpu_percent, memory_mb) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_usage());
            let rss = self.pid.and_then(|pid| {
                let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
                system.process(pid).map(sysinfo::Process::memory)
            });
            (cpu, rss.unwrap_or(0) as f64 / (1024.0 * 1024.0))
        };
        let memory_percent = if self.total_memory_mb > 0.0 {
            memory_mb / self.total_memory_mb * 100.0
        } else {
            0.0
        };

        let metrics = ResourceMetrics {
            cpu_percent,
            memory_mb,
            memory_percent,
            active_connections,
            queued_messages,
            estimated_bandwidth_mbps: self.estimate_bandwidth(),
        };

        let mut history = self.history.lock();
        if history.len() == HISTORY_CAP {
            let _ = history.pop_front();
        }
        history.push_back(metrics.clone());
        debug!(
            cpu = metrics.cpu_percent,
            memory_mb = metrics.memory_mb,
            connections = active_connections,
            queued = queued_messages,
            "resource sample"
        );
        metrics
    }

    /// Evaluate every threshold independently.
    ///
    /// Any single violation sets `is_critical` and appends a warning;
    /// violations are not mutually exclusive.
    #[allow(clippy::cast_precision_loss)]
    pub fn check_thresholds(&self, metrics: &ResourceMetrics) -> ThresholdReport {
        let mut report = ThresholdReport::default();

        if metrics.memory_mb > self.settings.memory_limit_mb {
            report.is_critical = true;
            report.warnings.push(format!(
                "memory usage {:.1} MB exceeds limit {:.0} MB",
                metrics.memory_mb, self.settings.memory_limit_mb
            ));
        }
        if metrics.cpu_percent > self.settings.cpu_threshold_percent {
            report.is_critical = true;
            report.warnings.push(format!(
                "CPU usage {:.1}% exceeds threshold {:.0}%",
                metrics.cpu_percent, self.settings.cpu_threshold_percent
            ));
        }
        if self.max_connections > 0 {
            let ratio = metrics.active_connections as f64 / self.max_connections as f64;
            if ratio >= 0.9 {
                report.is_critical = true;
                report.warnings.push(format!(
                    "connection count {} is at {:.0}% of the {} cap",
                    metrics.active_connections,
                    ratio * 100.0,
                    self.max_connections
                ));
            }
        }
        if self.queue_capacity > 0 {
            let ratio = metrics.queued_messages as f64 / self.queue_capacity as f64;
            if ratio >= 0.9 {
                report.is_critical = true;
                report.warnings.push(format!(
                    "queue depth {} is at {:.0}% of the {} cap",
                    metrics.queued_messages,
                    ratio * 100.0,
                    self.queue_capacity
                ));
            }
        }
        report
    }

    /// Average CPU/memory over the last `window` samples.
    ///
    /// Returns `None` before the first sample.
    pub fn window_average(&self, window: usize) -> Option<WindowAverage> {
        let history = self.history.lock();
        if history.is_empty() || window == 0 {
            return None;
        }
        let taken: Vec<&ResourceMetrics> = history.iter().rev().take(window).collect();
        #[allow(clippy::cast_precision_loss)]
        let n = taken.len() as f64;
        Some(WindowAverage {
            cpu_percent: taken.iter().map(|m| m.cpu_percent).sum::<f64>() / n,
            memory_mb: taken.iter().map(|m| m.memory_mb).sum::<f64>() / n,
        })
    }

    /// Number of retained samples.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Governor settings this monitor evaluates against.
    #[must_use]
    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Mbps estimate from the delta of cumulative interface counters.
    #[allow(clippy::cast_precision_loss)]
    fn estimate_bandwidth(&self) -> f64 {
        let mut networks = self.networks.lock();
        networks.refresh(true);
        let total: u64 = networks
            .iter()
            .map(|(_, data)| data.total_received() + data.total_transmitted())
            .sum();

        let now = Instant::now();
        let mut last = self.last_net.lock();
        let estimate = match *last {
            Some((at, previous)) if total >= previous => {
                let secs = now.duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    (total - previous) as f64 * 8.0 / 1_000_000.0 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        *last = Some((now, total));
        estimate
    }
}
