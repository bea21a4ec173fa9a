//! Periodic pool health classification and remediation.
//!
//! Health is a derived classification, recomputed from the latest metrics
//! on every tick — there is no stored transition-guarded state machine.
//! Remediation is bounded: emergency cleanup closes at most a batch of
//! idle connections per tick, and scale-down never drops below the
//! configured floor. The governor references connections by id only and
//! removes them exclusively through the router/pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_queue::PriorityMessageQueue;
use pulse_settings::GovernorSettings;

use crate::websocket::router::ConnectionBroadcastRouter;

use super::monitor::{ResourceMetrics, ResourceMonitor};

/// Derived pool health classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    /// No CPU/memory pressure, no overload.
    Healthy,
    /// CPU above 50% or memory above 70%, but no critical violation.
    Degraded,
    /// Connection count above 90% of the cap.
    Overloaded,
    /// A hard resource threshold is breached.
    Critical,
}

impl PoolHealth {
    /// Stable lowercase name (health endpoint, logs).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Overloaded => "overloaded",
            Self::Critical => "critical",
        }
    }
}

/// Reporting snapshot.
#[derive(Clone, Debug)]
pub struct GovernorReport {
    /// Latest classification.
    pub health: PoolHealth,
    /// Live connections right now.
    pub active_connections: usize,
    /// Connections observed closed since startup.
    pub closed_connections: u64,
    /// Running average connection lifetime (incremental mean).
    pub average_lifetime_secs: f64,
    /// Connections currently tracked for reuse accounting.
    pub tracked_connections: usize,
}

struct SeenConnection {
    first_seen: Instant,
    reuse_count: u64,
}

#[derive(Default)]
struct LifetimeStats {
    closed: u64,
    mean_secs: f64,
}

impl LifetimeStats {
    /// Incremental mean update; no stored history.
    fn record(&mut self, lifetime: Duration) {
        self.closed += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.closed as f64;
        self.mean_secs += (lifetime.as_secs_f64() - self.mean_secs) / n;
    }
}

/// Background health/auto-scaling governor over one connection pool.
pub struct ConnectionPoolGovernor {
    router: Arc<ConnectionBroadcastRouter>,
    monitor: Arc<ResourceMonitor>,
    queue: Arc<PriorityMessageQueue>,
    settings: GovernorSettings,
    queue_capacity: usize,
    interval: Duration,
    health: Mutex<PoolHealth>,
    seen: Mutex<HashMap<String, SeenConnection>>,
    lifetimes: Mutex<LifetimeStats>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPoolGovernor {
    /// Create a governor.
    ///
    /// `queue_capacity` is the ingress-queue cap used for the queue-ratio
    /// classification.
    #[must_use]
    pub fn new(
        router: Arc<ConnectionBroadcastRouter>,
        monitor: Arc<ResourceMonitor>,
        queue: Arc<PriorityMessageQueue>,
        settings: GovernorSettings,
        queue_capacity: usize,
    ) -> Self {
        let interval = Duration::from_secs(settings.health_check_interval_secs);
        Self {
            router,
            monitor,
            queue,
            settings,
            queue_capacity,
            interval,
            health: Mutex::new(PoolHealth::Healthy),
            seen: Mutex::new(HashMap::new()),
            lifetimes: Mutex::new(LifetimeStats::default()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override the tick interval (tests, embedders).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Latest classification.
    pub fn health(&self) -> PoolHealth {
        *self.health.lock()
    }

    /// Times a connection id has been observed serving across ticks.
    pub fn reuse_count(&self, id: &str) -> u64 {
        self.seen.lock().get(id).map_or(0, |seen| seen.reuse_count)
    }

    /// Reporting snapshot.
    pub fn report(&self) -> GovernorReport {
        let lifetimes = self.lifetimes.lock();
        GovernorReport {
            health: self.health(),
            active_connections: self.router.pool().count(),
            closed_connections: lifetimes.closed,
            average_lifetime_secs: lifetimes.mean_secs,
            tracked_connections: self.seen.lock().len(),
        }
    }

    /// Spawn the periodic health-check loop.
    pub fn start(self: &Arc<Self>) {
        let governor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(governor.interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => governor.tick(),
                    () = governor.cancel.cancelled() => break,
                }
            }
        });
        self.tasks.lock().push(handle);
        debug!("governor loop started");
    }

    /// Stop the loop; no tick runs after this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        debug!("governor loop stopped");
    }

    /// One health-check tick: sample, classify, remediate.
    pub fn tick(&self) {
        let active = self.router.pool().count();
        let queued = self.queue.total_len();
        let metrics = self.monitor.sample(active, queued);
        let report = self.monitor.check_thresholds(&metrics);
        for warning in &report.warnings {
            warn!(warning, "resource threshold breached");
        }

        let health = self.classify_metrics(&metrics);
        *self.health.lock() = health;
        gauge!("governor_health_rank").set(f64::from(health_rank(health)));
        #[allow(clippy::cast_precision_loss)]
        gauge!("queue_depth").set(queued as f64);

        self.sweep_connection_stats();

        if health == PoolHealth::Critical {
            let closed = self.emergency_cleanup();
            if closed > 0 {
                warn!(closed, "emergency cleanup closed idle connections");
            }
        } else {
            self.run_optimization();
        }
    }

    /// Derive the classification from one sample.
    pub fn classify_metrics(&self, metrics: &ResourceMetrics) -> PoolHealth {
        let max = self.router.pool().max_size();
        #[allow(clippy::cast_precision_loss)]
        let connection_ratio = if max > 0 {
            metrics.active_connections as f64 / max as f64
        } else {
            0.0
        };
        #[allow(clippy::cast_precision_loss)]
        let queue_ratio = if self.queue_capacity > 0 {
            metrics.queued_messages as f64 / self.queue_capacity as f64
        } else {
            0.0
        };

        if metrics.memory_mb > self.settings.memory_limit_mb
            || metrics.cpu_percent > self.settings.cpu_threshold_percent
            || queue_ratio >= 0.9
        {
            PoolHealth::Critical
        } else if connection_ratio > 0.9 {
            PoolHealth::Overloaded
        } else if metrics.cpu_percent > 50.0 || metrics.memory_percent > 70.0 {
            PoolHealth::Degraded
        } else {
            PoolHealth::Healthy
        }
    }

    /// Close idle connections (idle beyond half the timeout) in discovery
    /// order, at most `emergency_batch_size` per call so one tick stays
    /// bounded. Returns the number closed.
    pub fn emergency_cleanup(&self) -> usize {
        let idle_threshold = self.router.connection_timeout() / 2;
        let mut closed = 0;
        for connection in self.router.pool().all() {
            if closed >= self.settings.emergency_batch_size {
                break;
            }
            if connection.idle_time() > idle_threshold {
                let _ = self
                    .router
                    .disconnect(connection.id.as_str(), "emergency cleanup");
                closed += 1;
            }
        }
        counter!("governor_emergency_cleanups_total").increment(1);
        closed
    }

    /// Routine optimization: scale down toward the floor under low
    /// utilization, or prepare capacity under high utilization.
    pub fn run_optimization(&self) {
        let active = self.router.pool().count();
        let max = self.router.pool().max_size();
        if max == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let utilization = active as f64 / max as f64;

        if utilization < self.settings.scale_down_utilization
            && active > self.settings.min_connections
        {
            let excess = active - self.settings.min_connections;
            let mut connections = self.router.pool().all();
            connections.sort_by_key(|connection| std::cmp::Reverse(connection.idle_time()));
            let mut closed = 0;
            for connection in connections.into_iter().take(excess) {
                if self
                    .router
                    .disconnect(connection.id.as_str(), "scale down")
                {
                    closed += 1;
                }
            }
            if closed > 0 {
                counter!("governor_scale_downs_total").increment(1);
                info!(closed, floor = self.settings.min_connections, "scaled pool down");
            }
        } else if utilization > self.settings.scale_up_utilization {
            self.prepare_capacity();
        }
    }

    /// Capacity preparation hook, reserved for pre-warming strategies.
    fn prepare_capacity(&self) {
        debug!("utilization high, capacity preparation hook invoked");
    }

    /// Close every connection flagged not-alive, then run one stats
    /// collection pass. The caller-invoked emergency valve, distinct from
    /// the periodic loop.
    pub fn force_cleanup(&self) -> usize {
        let mut closed = 0;
        for connection in self.router.pool().all() {
            if !connection.alive()
                && self
                    .router
                    .disconnect(connection.id.as_str(), "force cleanup")
            {
                closed += 1;
            }
        }
        self.sweep_connection_stats();
        info!(closed, "force cleanup completed");
        closed
    }

    /// Update reuse counters for live connections and fold the lifetimes
    /// of disappeared ones into the running average.
    fn sweep_connection_stats(&self) {
        let live = self.router.pool().all();
        let mut seen = self.seen.lock();

        let mut live_ids = std::collections::HashSet::with_capacity(live.len());
        for connection in &live {
            let id = connection.id.as_str().to_string();
            let _ = live_ids.insert(id.clone());
            seen.entry(id)
                .and_modify(|entry| entry.reuse_count += 1)
                .or_insert(SeenConnection {
                    first_seen: connection.created_at,
                    reuse_count: 0,
                });
        }

        let mut lifetimes = self.lifetimes.lock();
        seen.retain(|id, entry| {
            if live_ids.contains(id) {
                true
            } else {
                lifetimes.record(entry.first_seen.elapsed());
                false
            }
        });
    }
}

fn health_rank(health: PoolHealth) -> u8 {
    match health {
        PoolHealth::Healthy => 0,
        PoolHealth::Degraded => 1,
        PoolHealth::Overloaded => 2,
        PoolHealth::Critical => 3,
    }
}
