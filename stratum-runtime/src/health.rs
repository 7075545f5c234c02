//! Rolling-window health aggregation and host resource sampling.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use sysinfo::System;

use stratum_core::{
    format_uptime, ConfigError, HealthReport, HealthStatus, LastError, OperationCounts,
    OperationKind, ResourceSnapshot, Timestamp,
};

use crate::constants::{
    DEFAULT_HARD_ERROR_RATE, DEFAULT_HARD_RESOURCE_PERCENT, DEFAULT_HEALTH_BUCKET_SECS,
    DEFAULT_HEALTH_WINDOW_SECS, DEFAULT_SOFT_ERROR_RATE, DEFAULT_SOFT_RESOURCE_PERCENT,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the health aggregator.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Length of the rolling counter window.
    pub window: Duration,
    /// Width of one counter bucket.
    pub bucket_width: Duration,
    /// Windowed error rate at or above which status is Degraded.
    pub soft_error_rate: f64,
    /// Windowed error rate at or above which status is Unhealthy.
    pub hard_error_rate: f64,
    /// Resource percentage at or above which status is Degraded.
    pub soft_resource_percent: f32,
    /// Resource percentage at or above which status is Unhealthy.
    pub hard_resource_percent: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_HEALTH_WINDOW_SECS),
            bucket_width: Duration::from_secs(DEFAULT_HEALTH_BUCKET_SECS),
            soft_error_rate: DEFAULT_SOFT_ERROR_RATE,
            hard_error_rate: DEFAULT_HARD_ERROR_RATE,
            soft_resource_percent: DEFAULT_SOFT_RESOURCE_PERCENT,
            hard_resource_percent: DEFAULT_HARD_RESOURCE_PERCENT,
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_bucket_width(mut self, width: Duration) -> Self {
        self.bucket_width = width;
        self
    }

    pub fn with_error_rates(mut self, soft: f64, hard: f64) -> Self {
        self.soft_error_rate = soft;
        self.hard_error_rate = hard;
        self
    }

    pub fn with_resource_percents(mut self, soft: f32, hard: f32) -> Self {
        self.soft_resource_percent = soft;
        self.hard_resource_percent = hard;
        self
    }

    /// Create HealthConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_HEALTH_WINDOW_SECS`: Rolling window length (default: 300)
    /// - `STRATUM_HEALTH_SOFT_ERROR_RATE`: Degraded error rate (default: 0.10)
    /// - `STRATUM_HEALTH_HARD_ERROR_RATE`: Unhealthy error rate (default: 0.50)
    /// - `STRATUM_HEALTH_SOFT_RESOURCE_PCT`: Degraded resource percent (default: 80)
    /// - `STRATUM_HEALTH_HARD_RESOURCE_PCT`: Unhealthy resource percent (default: 95)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window: std::env::var("STRATUM_HEALTH_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.window),
            bucket_width: defaults.bucket_width,
            soft_error_rate: std::env::var("STRATUM_HEALTH_SOFT_ERROR_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.soft_error_rate),
            hard_error_rate: std::env::var("STRATUM_HEALTH_HARD_ERROR_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.hard_error_rate),
            soft_resource_percent: std::env::var("STRATUM_HEALTH_SOFT_RESOURCE_PCT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.soft_resource_percent),
            hard_resource_percent: std::env::var("STRATUM_HEALTH_HARD_RESOURCE_PCT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.hard_resource_percent),
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_width.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "health.bucket_width".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.window < self.bucket_width {
            return Err(ConfigError::InvalidValue {
                field: "health.window".to_string(),
                value: format!("{}s", self.window.as_secs()),
                reason: "must be at least one bucket wide".to_string(),
            });
        }
        if !(self.soft_error_rate > 0.0 && self.soft_error_rate < self.hard_error_rate) {
            return Err(ConfigError::InvalidValue {
                field: "health.soft_error_rate".to_string(),
                value: self.soft_error_rate.to_string(),
                reason: "must be positive and below hard_error_rate".to_string(),
            });
        }
        if self.hard_error_rate > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "health.hard_error_rate".to_string(),
                value: self.hard_error_rate.to_string(),
                reason: "must not exceed 1.0".to_string(),
            });
        }
        if !(self.soft_resource_percent > 0.0
            && self.soft_resource_percent < self.hard_resource_percent)
        {
            return Err(ConfigError::InvalidValue {
                field: "health.soft_resource_percent".to_string(),
                value: self.soft_resource_percent.to_string(),
                reason: "must be positive and below hard_resource_percent".to_string(),
            });
        }
        if self.hard_resource_percent > 100.0 {
            return Err(ConfigError::InvalidValue {
                field: "health.hard_resource_percent".to_string(),
                value: self.hard_resource_percent.to_string(),
                reason: "must not exceed 100".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// WINDOW STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Bucket {
    start: Option<Timestamp>,
    counts: OperationCounts,
    errors: u64,
    latency_sum_ms: u64,
    latency_max_ms: u64,
}

impl Bucket {
    fn fresh(start: Timestamp) -> Self {
        Self {
            start: Some(start),
            ..Self::default()
        }
    }
}

/// Everything mutated by record/snapshot calls, behind one lock so
/// `status()` reads a consistent snapshot.
#[derive(Debug, Default)]
struct WindowState {
    buckets: VecDeque<Bucket>,
    collections: HashSet<String>,
    last_error: Option<LastError>,
    resources: Option<ResourceSnapshot>,
    backend_issue: Option<String>,
}

// ============================================================================
// HEALTH AGGREGATOR
// ============================================================================

/// Counts operations, errors, and latencies in rolling windows and
/// derives a status classification plus host resource snapshot.
///
/// `record` is an O(1) bucket update. Classification: Unhealthy when the
/// windowed error rate or any resource percentage reaches its hard
/// ceiling (or the watchdog has escalated a backend outage); Degraded
/// when a soft ceiling is reached; Healthy otherwise. Thresholds are
/// inclusive, so a rate sitting exactly on a ceiling classifies at that
/// ceiling's severity.
pub struct HealthAggregator {
    state: Mutex<WindowState>,
    system: Mutex<System>,
    config: HealthConfig,
    started_at: Timestamp,
    start_instant: Instant,
}

impl HealthAggregator {
    /// Create an aggregator from a validated configuration.
    pub fn new(config: HealthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut system = System::new_all();
        system.refresh_all();
        Ok(Self {
            state: Mutex::new(WindowState::default()),
            system: Mutex::new(system),
            config,
            started_at: Utc::now(),
            start_instant: Instant::now(),
        })
    }

    /// Create an aggregator with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(HealthConfig::default()).expect("default health config is valid")
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record one operation outcome into the current time bucket.
    pub fn record(&self, kind: OperationKind, duration: Duration, success: bool) {
        self.record_at(kind, duration, success, Utc::now());
    }

    pub(crate) fn record_at(
        &self,
        kind: OperationKind,
        duration: Duration,
        success: bool,
        now: Timestamp,
    ) {
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let needs_bucket = match state.buckets.back() {
            Some(bucket) => match bucket.start {
                Some(start) => {
                    now.signed_duration_since(start).to_std().unwrap_or_default()
                        >= self.config.bucket_width
                }
                None => true,
            },
            None => true,
        };
        if needs_bucket {
            state.buckets.push_back(Bucket::fresh(now));
        }
        let bucket = state.buckets.back_mut().expect("bucket just ensured");

        let millis = duration.as_millis() as u64;
        match kind {
            OperationKind::Query => bucket.counts.queries += 1,
            OperationKind::Insert => bucket.counts.inserts += 1,
            OperationKind::Update => bucket.counts.updates += 1,
            OperationKind::Delete => bucket.counts.deletes += 1,
        }
        bucket.latency_sum_ms += millis;
        bucket.latency_max_ms = bucket.latency_max_ms.max(millis);
        if !success {
            bucket.errors += 1;
            state.last_error = Some(LastError {
                message: format!("{} operation failed", kind),
                at: now,
            });
        }
    }

    /// Attach a message to the most recent failure, when the caller has
    /// error detail beyond the success flag.
    pub fn note_error(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        state.last_error = Some(LastError {
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Record a collection as touched (distinct-collections metric).
    pub fn record_collection(&self, name: &str) {
        let mut state = self.state.lock();
        if !state.collections.contains(name) {
            state.collections.insert(name.to_string());
        }
    }

    /// Capture host CPU/memory/disk utilization. Scheduler-invoked; the
    /// long-lived `System` is kept so CPU deltas are meaningful between
    /// samples.
    pub fn snapshot_resources(&self) -> ResourceSnapshot {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let memory_percent = if system.total_memory() == 0 {
                0.0
            } else {
                (system.used_memory() as f64 / system.total_memory() as f64 * 100.0) as f32
            };
            (system.global_cpu_usage(), memory_percent)
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let (total, available) = disks
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let disk_percent = if total == 0 {
            0.0
        } else {
            ((total - available) as f64 / total as f64 * 100.0) as f32
        };

        let snapshot = ResourceSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            sampled_at: Utc::now(),
        };
        self.state.lock().resources = Some(snapshot);
        tracing::debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            disk = snapshot.disk_percent,
            "Sampled host resources"
        );
        snapshot
    }

    /// Inject a resource snapshot directly. Used by tests and by
    /// embedders that sample through their own telemetry.
    pub fn set_resources(&self, snapshot: ResourceSnapshot) {
        self.state.lock().resources = Some(snapshot);
    }

    /// Watchdog escalation: the backing store has been unreachable past
    /// the retry ceiling.
    pub fn set_backend_unreachable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Backend marked unreachable");
        self.state.lock().backend_issue = Some(reason);
    }

    /// Watchdog recovery: the backing store is reachable again.
    pub fn clear_backend_unreachable(&self) {
        let mut state = self.state.lock();
        if state.backend_issue.take().is_some() {
            tracing::info!("Backend reachable again");
        }
    }

    /// Seconds since the aggregator was constructed.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_instant.elapsed().as_secs()
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Build the current health report as one consistent snapshot.
    pub fn status(&self) -> HealthReport {
        self.status_at(Utc::now())
    }

    pub(crate) fn status_at(&self, now: Timestamp) -> HealthReport {
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let mut operations = OperationCounts::default();
        let mut errors = 0u64;
        let mut latency_sum_ms = 0u64;
        let mut latency_max_ms = 0u64;
        for bucket in &state.buckets {
            operations.queries += bucket.counts.queries;
            operations.inserts += bucket.counts.inserts;
            operations.updates += bucket.counts.updates;
            operations.deletes += bucket.counts.deletes;
            errors += bucket.errors;
            latency_sum_ms += bucket.latency_sum_ms;
            latency_max_ms = latency_max_ms.max(bucket.latency_max_ms);
        }
        let total = operations.total();
        let error_rate = if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        };
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            latency_sum_ms as f64 / total as f64
        };

        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        // Hard ceilings first so the issue list leads with the worst signal.
        if let Some(reason) = &state.backend_issue {
            status = HealthStatus::Unhealthy;
            issues.push(format!("Backing store unreachable: {}", reason));
        }
        if total > 0 && error_rate >= self.config.hard_error_rate {
            status = HealthStatus::Unhealthy;
            issues.push(format!("Critical error rate: {:.1}%", error_rate * 100.0));
        }
        if let Some(resources) = &state.resources {
            for (name, value) in [
                ("CPU", resources.cpu_percent),
                ("memory", resources.memory_percent),
                ("disk", resources.disk_percent),
            ] {
                if value >= self.config.hard_resource_percent {
                    status = HealthStatus::Unhealthy;
                    issues.push(format!("Critical {} usage: {:.1}%", name, value));
                }
            }
        }

        if status != HealthStatus::Unhealthy {
            if total > 0 && error_rate >= self.config.soft_error_rate {
                status = HealthStatus::Degraded;
                issues.push(format!("High error rate: {:.1}%", error_rate * 100.0));
            }
            if let Some(resources) = &state.resources {
                for (name, value) in [
                    ("CPU", resources.cpu_percent),
                    ("memory", resources.memory_percent),
                    ("disk", resources.disk_percent),
                ] {
                    if value >= self.config.soft_resource_percent
                        && value < self.config.hard_resource_percent
                    {
                        status = HealthStatus::Degraded;
                        issues.push(format!("High {} usage: {:.1}%", name, value));
                    }
                }
            }
        }

        let uptime = self.uptime_seconds();
        HealthReport {
            status,
            issues,
            uptime_seconds: uptime,
            uptime_human: format_uptime(uptime),
            operations,
            errors,
            error_rate,
            avg_latency_ms,
            max_latency_ms: latency_max_ms,
            distinct_collections: state.collections.len(),
            resources: state.resources,
            last_error: state.last_error.clone(),
            generated_at: now,
        }
    }

    /// Drop buckets that have aged out of the window.
    fn roll(&self, state: &mut WindowState, now: Timestamp) {
        let horizon = now - chrono::Duration::from_std(self.config.window).unwrap_or_default();
        while matches!(
            state.buckets.front(),
            Some(bucket) if matches!(bucket.start, Some(start) if start < horizon)
        ) {
            state.buckets.pop_front();
        }
    }
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> HealthAggregator {
        HealthAggregator::with_defaults()
    }

    fn record_n(
        agg: &HealthAggregator,
        now: Timestamp,
        successes: usize,
        failures: usize,
    ) {
        for _ in 0..successes {
            agg.record_at(OperationKind::Query, Duration::from_millis(10), true, now);
        }
        for _ in 0..failures {
            agg.record_at(OperationKind::Query, Duration::from_millis(10), false, now);
        }
    }

    #[test]
    fn test_healthy_with_no_traffic() {
        let agg = aggregator();
        let report = agg.status();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.error_rate, 0.0);
    }

    #[test]
    fn test_error_rate_at_hard_ceiling_is_unhealthy() {
        let agg = aggregator(); // hard 0.50
        let now = Utc::now();
        record_n(&agg, now, 5, 5); // exactly 50%
        let report = agg.status_at(now);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.issues[0].contains("Critical error rate"));
    }

    #[test]
    fn test_error_rate_below_hard_ceiling_is_degraded() {
        let agg = aggregator();
        let now = Utc::now();
        record_n(&agg, now, 6, 4); // 40%: above soft 10%, below hard 50%
        let report = agg.status_at(now);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_error_rate_at_soft_ceiling_is_degraded() {
        let agg = aggregator(); // soft 0.10
        let now = Utc::now();
        record_n(&agg, now, 9, 1); // exactly 10%
        let report = agg.status_at(now);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.issues[0].contains("High error rate"));
    }

    #[test]
    fn test_error_rate_below_soft_ceiling_is_healthy() {
        let agg = aggregator();
        let now = Utc::now();
        record_n(&agg, now, 19, 1); // 5%
        let report = agg.status_at(now);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_ten_ops_six_failures_is_unhealthy() {
        let agg = aggregator();
        let now = Utc::now();
        record_n(&agg, now, 4, 6); // 60% > 50% hard ceiling
        let report = agg.status_at(now);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_errors_roll_off_the_window() {
        let agg = HealthAggregator::new(
            HealthConfig::default().with_window(Duration::from_secs(60)),
        )
        .unwrap();
        let t0 = Utc::now();
        record_n(&agg, t0, 0, 10);

        // Inside the window: unhealthy.
        assert_eq!(
            agg.status_at(t0 + chrono::Duration::seconds(30)).status,
            HealthStatus::Unhealthy
        );
        // Window has passed: the failures no longer count.
        let later = t0 + chrono::Duration::seconds(120);
        let report = agg.status_at(later);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.operations.total(), 0);
    }

    #[test]
    fn test_resource_soft_ceiling_degrades() {
        let agg = aggregator();
        agg.set_resources(ResourceSnapshot {
            cpu_percent: 85.0,
            memory_percent: 10.0,
            disk_percent: 10.0,
            sampled_at: Utc::now(),
        });
        let report = agg.status();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.issues[0].contains("CPU"));
    }

    #[test]
    fn test_resource_hard_ceiling_is_unhealthy() {
        let agg = aggregator();
        agg.set_resources(ResourceSnapshot {
            cpu_percent: 10.0,
            memory_percent: 96.0,
            disk_percent: 10.0,
            sampled_at: Utc::now(),
        });
        let report = agg.status();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.issues[0].contains("memory"));
    }

    #[test]
    fn test_backend_unreachable_escalates_and_clears() {
        let agg = aggregator();
        agg.set_backend_unreachable("probe failed for /data/store.db");
        let report = agg.status();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.issues[0].contains("unreachable"));

        agg.clear_backend_unreachable();
        assert_eq!(agg.status().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_latency_aggregation() {
        let agg = aggregator();
        let now = Utc::now();
        agg.record_at(OperationKind::Query, Duration::from_millis(10), true, now);
        agg.record_at(OperationKind::Query, Duration::from_millis(30), true, now);
        let report = agg.status_at(now);
        assert_eq!(report.avg_latency_ms, 20.0);
        assert_eq!(report.max_latency_ms, 30);
    }

    #[test]
    fn test_operation_kind_counters() {
        let agg = aggregator();
        let now = Utc::now();
        agg.record_at(OperationKind::Query, Duration::ZERO, true, now);
        agg.record_at(OperationKind::Insert, Duration::ZERO, true, now);
        agg.record_at(OperationKind::Insert, Duration::ZERO, true, now);
        agg.record_at(OperationKind::Delete, Duration::ZERO, true, now);
        let report = agg.status_at(now);
        assert_eq!(report.operations.queries, 1);
        assert_eq!(report.operations.inserts, 2);
        assert_eq!(report.operations.updates, 0);
        assert_eq!(report.operations.deletes, 1);
    }

    #[test]
    fn test_distinct_collections() {
        let agg = aggregator();
        agg.record_collection("docs");
        agg.record_collection("docs");
        agg.record_collection("notes");
        assert_eq!(agg.status().distinct_collections, 2);
    }

    #[test]
    fn test_failure_sets_last_error() {
        let agg = aggregator();
        let now = Utc::now();
        agg.record_at(OperationKind::Update, Duration::ZERO, false, now);
        agg.note_error("document 42 version conflict");
        let report = agg.status_at(now);
        let last = report.last_error.unwrap();
        assert!(last.message.contains("version conflict"));
    }

    #[test]
    fn test_snapshot_resources_reports_percentages() {
        let agg = aggregator();
        let snapshot = agg.snapshot_resources();
        assert!((0.0..=100.0).contains(&snapshot.memory_percent));
        assert!((0.0..=100.0).contains(&snapshot.disk_percent));
        assert!(agg.status().resources.is_some());
    }

    #[test]
    fn test_config_validate_rejects_inverted_rates() {
        let config = HealthConfig::default().with_error_rates(0.6, 0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_inverted_resources() {
        let config = HealthConfig::default().with_resource_percents(96.0, 95.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_window_smaller_than_bucket() {
        let config = HealthConfig::default()
            .with_window(Duration::from_secs(5))
            .with_bucket_width(Duration::from_secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_uptime_counts_up() {
        let agg = aggregator();
        let report = agg.status();
        assert!(report.uptime_seconds < 5);
        assert!(report.uptime_human.ends_with('s'));
    }
}
