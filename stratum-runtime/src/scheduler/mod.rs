//! Background maintenance scheduling.
//!
//! This module runs named jobs on fixed intervals on one background
//! execution loop. Jobs can become stuck in their own right - a
//! caller-supplied action that hangs stalls subsequent checks until it
//! returns (an accepted simplification) - but a FAILING job never
//! disturbs the loop: the error is recorded on the job, logged, and the
//! job stays on its fixed schedule.
//!
//! # Usage
//!
//! Background jobs are typically registered during runtime construction
//! and the loop started once:
//!
//! ```ignore
//! let scheduler = MaintenanceScheduler::new(SchedulerConfig::default())?;
//! scheduler.schedule("cache_cleanup", IntervalSpec::parse("hourly")?, {
//!     let cache = Arc::clone(&cache);
//!     Arc::new(move || {
//!         cache.cleanup();
//!         Ok(())
//!     })
//! })?;
//! scheduler.start();
//!
//! // On shutdown
//! scheduler.shutdown().await;
//! ```

pub mod watchdog;

pub use watchdog::{FileStoreProbe, StoreProbe, StoreWatchdog, WatchdogConfig};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use stratum_core::{ConfigError, StratumResult, Timestamp};

use crate::constants::{
    DEFAULT_CACHE_CLEANUP_INTERVAL_SECS, DEFAULT_HEALTH_SNAPSHOT_INTERVAL_SECS,
    DEFAULT_SCHEDULER_TICK_SECS,
};

// ============================================================================
// INTERVAL SPECS
// ============================================================================

/// When a job runs: a fixed period, or one of the named schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSpec {
    /// A fixed period.
    Every(Duration),
    /// Once an hour.
    Hourly,
    /// Once a day.
    Daily,
    /// Once a week.
    Weekly,
}

impl IntervalSpec {
    /// The period between runs.
    pub fn period(&self) -> Duration {
        match self {
            IntervalSpec::Every(period) => *period,
            IntervalSpec::Hourly => Duration::from_secs(3600),
            IntervalSpec::Daily => Duration::from_secs(86_400),
            IntervalSpec::Weekly => Duration::from_secs(604_800),
        }
    }

    /// Parse a spec string.
    ///
    /// Accepted forms: `hourly`, `daily`, `weekly`, and
    /// `every_<n>_seconds` / `every_<n>_minutes` / `every_<n>_hours`.
    /// Anything else is a configuration error - schedules are never
    /// silently defaulted.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        match spec {
            "hourly" => return Ok(IntervalSpec::Hourly),
            "daily" => return Ok(IntervalSpec::Daily),
            "weekly" => return Ok(IntervalSpec::Weekly),
            _ => {}
        }

        let parts: Vec<&str> = spec.split('_').collect();
        if parts.len() == 3 && parts[0] == "every" {
            if let Ok(count) = parts[1].parse::<u64>() {
                if count > 0 {
                    let period = match parts[2] {
                        "seconds" => Some(Duration::from_secs(count)),
                        "minutes" => Some(Duration::from_secs(count * 60)),
                        "hours" => Some(Duration::from_secs(count * 3600)),
                        _ => None,
                    };
                    if let Some(period) = period {
                        return Ok(IntervalSpec::Every(period));
                    }
                }
            }
        }

        Err(ConfigError::UnrecognizedInterval {
            spec: spec.to_string(),
        })
    }
}

impl FromStr for IntervalSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalSpec::Every(period) => write!(f, "every_{}_seconds", period.as_secs()),
            IntervalSpec::Hourly => f.write_str("hourly"),
            IntervalSpec::Daily => f.write_str("daily"),
            IntervalSpec::Weekly => f.write_str("weekly"),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the maintenance scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Loop wake-up period. Due jobs are detected within one tick.
    pub tick: Duration,
    /// Period of the default health resource-snapshot job.
    pub health_snapshot_interval: Duration,
    /// Period of the default cache cleanup job.
    pub cache_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(DEFAULT_SCHEDULER_TICK_SECS),
            health_snapshot_interval: Duration::from_secs(DEFAULT_HEALTH_SNAPSHOT_INTERVAL_SECS),
            cache_cleanup_interval: Duration::from_secs(DEFAULT_CACHE_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_health_snapshot_interval(mut self, interval: Duration) -> Self {
        self.health_snapshot_interval = interval;
        self
    }

    pub fn with_cache_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cache_cleanup_interval = interval;
        self
    }

    /// Create SchedulerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_SCHEDULER_TICK_SECS`: Loop tick (default: 1)
    /// - `STRATUM_HEALTH_SNAPSHOT_INTERVAL_SECS`: Snapshot job period (default: 300)
    /// - `STRATUM_CACHE_CLEANUP_INTERVAL_SECS`: Cleanup job period (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick: std::env::var("STRATUM_SCHEDULER_TICK_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick),
            health_snapshot_interval: std::env::var("STRATUM_HEALTH_SNAPSHOT_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_snapshot_interval),
            cache_cleanup_interval: std::env::var("STRATUM_CACHE_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_cleanup_interval),
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.tick".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.health_snapshot_interval.is_zero() || self.cache_cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.default_job_interval".to_string(),
                value: "0".to_string(),
                reason: "default job periods must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// JOBS
// ============================================================================

/// A parameterless unit of scheduled work.
pub type JobAction = Arc<dyn Fn() -> StratumResult<()> + Send + Sync>;

struct ScheduledJob {
    interval: IntervalSpec,
    action: JobAction,
    next_run_at: Timestamp,
    last_run_at: Option<Timestamp>,
    last_error: Option<String>,
    runs: u64,
    failures: u64,
}

/// Inspection snapshot of one scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub interval: String,
    pub next_run_at: Timestamp,
    pub last_run_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub failures: u64,
}

/// Counters describing scheduler activity since startup.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Loop wake-ups completed.
    pub ticks: AtomicU64,
    /// Job executions completed (success or failure).
    pub jobs_run: AtomicU64,
    /// Job executions that returned an error.
    pub job_failures: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            job_failures: self.job_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler metrics at a point in time.
#[derive(Debug, Clone)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub jobs_run: u64,
    pub job_failures: u64,
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Runs named jobs on fixed intervals on a background execution loop.
///
/// Per-job state machine: Idle -> Due (next_run_at reached) -> Running
/// -> Idle on success, or Running -> Failed -> Idle with the error
/// recorded in `last_error`. Failures are isolated per job and never
/// abort the loop; `next_run_at` advances on the fixed grid regardless
/// of outcome, so one failed run never delays the next.
///
/// The job-table lock is NEVER held across an action: due actions are
/// cloned out under the lock, executed with it released, and outcomes
/// recorded under a fresh acquisition.
pub struct MaintenanceScheduler {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    metrics: Arc<SchedulerMetrics>,
    config: SchedulerConfig,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    watchdog: Mutex<Option<StoreWatchdog>>,
}

impl MaintenanceScheduler {
    /// Create a scheduler from a validated configuration. No loop runs
    /// until [`start`](Self::start) is called.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(SchedulerMetrics::new()),
            config,
            shutdown_tx: Mutex::new(None),
            loop_handle: Mutex::new(None),
            watchdog: Mutex::new(None),
        })
    }

    /// Create a scheduler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default()).expect("default scheduler config is valid")
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a job. Duplicate names are rejected - two jobs silently
    /// sharing a name would make `unschedule` ambiguous.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        interval: IntervalSpec,
        action: JobAction,
    ) -> StratumResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(stratum_core::ValidationError::InvalidValue {
                field: "job.name".to_string(),
                reason: "must not be blank".to_string(),
            }
            .into());
        }
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&name) {
            return Err(ConfigError::DuplicateJob { name }.into());
        }
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(interval.period())
                .unwrap_or_else(|_| chrono::Duration::seconds(1));
        tracing::info!(job = %name, interval = %interval, "Scheduled maintenance job");
        jobs.insert(
            name,
            ScheduledJob {
                interval,
                action,
                next_run_at,
                last_run_at: None,
                last_error: None,
                runs: 0,
                failures: 0,
            },
        );
        Ok(())
    }

    /// Remove a job. Idempotent: unknown names are a no-op.
    pub fn unschedule(&self, name: &str) -> bool {
        let removed = self.jobs.lock().remove(name).is_some();
        if removed {
            tracing::info!(job = name, "Unscheduled maintenance job");
        }
        removed
    }

    /// Snapshot of all jobs for inspection, sorted by name.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock();
        let mut snapshots: Vec<JobSnapshot> = jobs
            .iter()
            .map(|(name, job)| JobSnapshot {
                name: name.clone(),
                interval: job.interval.to_string(),
                next_run_at: job.next_run_at,
                last_run_at: job.last_run_at,
                last_error: job.last_error.clone(),
                runs: job.runs,
                failures: job.failures,
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Start the background loop. Calling start on a running scheduler
    /// is a warning, not an error - the first loop keeps running.
    pub fn start(&self) {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            tracing::warn!("Scheduler already started; ignoring start request");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *shutdown_slot = Some(shutdown_tx);

        let jobs = Arc::clone(&self.jobs);
        let metrics = Arc::clone(&self.metrics);
        let tick = self.config.tick;
        let handle = tokio::spawn(scheduler_loop(jobs, metrics, tick, shutdown_rx));
        *self.loop_handle.lock() = Some(handle);
    }

    /// Attach and start the store watchdog. The scheduler owns its
    /// lifecycle: it is stopped by [`shutdown`](Self::shutdown).
    pub fn attach_watchdog(&self, watchdog: StoreWatchdog) {
        watchdog.start();
        *self.watchdog.lock() = Some(watchdog);
    }

    /// Signal shutdown and wait for the loop (and any attached
    /// watchdog) to observe it. The signal is observed within one tick;
    /// a job mid-execution finishes first.
    pub async fn shutdown(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(true);
        }
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let watchdog = self.watchdog.lock().take();
        if let Some(watchdog) = watchdog {
            watchdog.shutdown().await;
        }
    }

    /// Detect and run every due job once. Exposed for deterministic
    /// tests; the background loop calls this every tick.
    pub fn run_due_jobs(&self) -> usize {
        run_due_jobs_at(&self.jobs, &self.metrics, Utc::now())
    }
}

impl fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("jobs", &self.jobs.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

/// The background execution loop.
async fn scheduler_loop(
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    metrics: Arc<SchedulerMetrics>,
    tick: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(tick_secs = tick.as_secs_f64(), "Maintenance scheduler started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Maintenance scheduler shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                metrics.ticks.fetch_add(1, Ordering::Relaxed);
                run_due_jobs_at(&jobs, &metrics, Utc::now());
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        jobs_run = snapshot.jobs_run,
        job_failures = snapshot.job_failures,
        "Maintenance scheduler stopped"
    );
}

/// One pass over the job table: run everything due at `now`.
///
/// Jobs run sequentially - they are assumed short; a long-running job
/// stalls later checks until it returns. Returns how many jobs ran.
fn run_due_jobs_at(
    jobs: &Mutex<HashMap<String, ScheduledJob>>,
    metrics: &SchedulerMetrics,
    now: Timestamp,
) -> usize {
    // Collect due actions under the lock, run them with it released.
    let due: Vec<(String, JobAction)> = {
        let table = jobs.lock();
        table
            .iter()
            .filter(|(_, job)| job.next_run_at <= now)
            .map(|(name, job)| (name.clone(), Arc::clone(&job.action)))
            .collect()
    };

    for (name, action) in &due {
        let outcome = action();
        metrics.jobs_run.fetch_add(1, Ordering::Relaxed);

        let mut table = jobs.lock();
        // The job may have been unscheduled while running.
        let Some(job) = table.get_mut(name) else {
            continue;
        };
        job.last_run_at = Some(now);
        job.runs += 1;
        match outcome {
            Ok(()) => {
                job.last_error = None;
                tracing::debug!(job = %name, "Maintenance job completed");
            }
            Err(error) => {
                job.failures += 1;
                job.last_error = Some(error.to_string());
                metrics.job_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(job = %name, error = %error, "Maintenance job failed");
            }
        }
        // Advance on the fixed grid; skip slots the loop slept through
        // rather than bursting to catch up.
        let period = chrono::Duration::from_std(job.interval.period())
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        job.next_run_at += period;
        while job.next_run_at <= now {
            job.next_run_at += period;
        }
    }

    due.len()
}

// ============================================================================
// TESTS
// ============================================================================
