//! Backing-store liveness watchdog.
//!
//! Observes the persistent backend (file presence, connection
//! reachability) on its own timer, independent of the job table. On a
//! failed probe it triggers the probe's recovery action - debounced so
//! a flapping backend isn't restarted in a tight loop - and when
//! consecutive failures pass the retry ceiling it escalates to an
//! unhealthy report on the health aggregator rather than crashing the
//! process. Probe and recovery calls happen with no Stratum lock held.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use parking_lot::Mutex;
use stratum_core::{ConfigError, WatchdogError};

use crate::constants::{
    DEFAULT_WATCHDOG_CHECK_INTERVAL_SECS, DEFAULT_WATCHDOG_DEBOUNCE_SECS,
    DEFAULT_WATCHDOG_RETRY_CEILING,
};
use crate::health::HealthAggregator;

// ============================================================================
// PROBE CONTRACT
// ============================================================================

/// Liveness probe for the backing store.
///
/// Implementations own both the check and the recovery action - the
/// watchdog only decides WHEN to call them.
#[async_trait]
pub trait StoreProbe: Send + Sync {
    /// Whether the backend is currently reachable.
    async fn check(&self) -> bool;

    /// Attempt to bring the backend back (reconnect, restart).
    async fn recover(&self) -> Result<(), WatchdogError>;

    /// Human-readable identity for logs and health issues.
    fn target(&self) -> String;
}

/// Recovery callback for [`FileStoreProbe`].
pub type RecoveryAction = Arc<dyn Fn() -> Result<(), WatchdogError> + Send + Sync>;

/// Probe for file-backed stores: alive while the backing file exists.
pub struct FileStoreProbe {
    path: PathBuf,
    recovery: Option<RecoveryAction>,
}

impl FileStoreProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recovery: None,
        }
    }

    /// Attach the action to run when the file goes missing, typically
    /// a store restart.
    pub fn with_recovery(mut self, recovery: RecoveryAction) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreProbe for FileStoreProbe {
    async fn check(&self) -> bool {
        self.path.exists()
    }

    async fn recover(&self) -> Result<(), WatchdogError> {
        match &self.recovery {
            Some(recovery) => recovery(),
            None => Err(WatchdogError::NoRecoveryAction {
                target: self.target(),
            }),
        }
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the store watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often to probe the backend.
    pub check_interval: Duration,
    /// Minimum spacing between recovery attempts.
    pub debounce: Duration,
    /// Consecutive failed checks beyond which the watchdog escalates
    /// to an unhealthy report.
    pub retry_ceiling: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_WATCHDOG_CHECK_INTERVAL_SECS),
            debounce: Duration::from_secs(DEFAULT_WATCHDOG_DEBOUNCE_SECS),
            retry_ceiling: DEFAULT_WATCHDOG_RETRY_CEILING,
        }
    }
}

impl WatchdogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    /// Create WatchdogConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_WATCHDOG_CHECK_INTERVAL_SECS`: Probe period (default: 10)
    /// - `STRATUM_WATCHDOG_DEBOUNCE_SECS`: Recovery spacing (default: 5)
    /// - `STRATUM_WATCHDOG_RETRY_CEILING`: Escalation ceiling (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            check_interval: std::env::var("STRATUM_WATCHDOG_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.check_interval),
            debounce: std::env::var("STRATUM_WATCHDOG_DEBOUNCE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.debounce),
            retry_ceiling: std::env::var("STRATUM_WATCHDOG_RETRY_CEILING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_ceiling),
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "watchdog.check_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.retry_ceiling == 0 {
            return Err(ConfigError::InvalidValue {
                field: "watchdog.retry_ceiling".to_string(),
                value: "0".to_string(),
                reason: "must allow at least one retry before escalating".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters describing watchdog activity since startup.
#[derive(Debug, Default)]
pub struct WatchdogMetrics {
    pub checks: AtomicU64,
    pub failures: AtomicU64,
    pub recovery_attempts: AtomicU64,
    pub escalations: AtomicU64,
}

impl WatchdogMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WatchdogMetricsSnapshot {
        WatchdogMetricsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            recovery_attempts: self.recovery_attempts.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of watchdog metrics at a point in time.
#[derive(Debug, Clone)]
pub struct WatchdogMetricsSnapshot {
    pub checks: u64,
    pub failures: u64,
    pub recovery_attempts: u64,
    pub escalations: u64,
}

// ============================================================================
// WATCHDOG
// ============================================================================

/// Liveness monitor for the persistent backend.
///
/// Runs its own cancellable loop, separate from the maintenance job
/// table, so a slow maintenance job can never mask an outage.
pub struct StoreWatchdog {
    probe: Arc<dyn StoreProbe>,
    health: Arc<HealthAggregator>,
    config: WatchdogConfig,
    metrics: Arc<WatchdogMetrics>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StoreWatchdog {
    /// Create a watchdog from a validated configuration. No loop runs
    /// until [`start`](Self::start) is called.
    pub fn new(
        probe: Arc<dyn StoreProbe>,
        health: Arc<HealthAggregator>,
        config: WatchdogConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            probe,
            health,
            config,
            metrics: Arc::new(WatchdogMetrics::new()),
            shutdown_tx: Mutex::new(None),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn metrics(&self) -> WatchdogMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Start the watchdog loop.
    pub fn start(&self) {
        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.is_some() {
            tracing::warn!("Watchdog already started; ignoring start request");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *shutdown_slot = Some(shutdown_tx);

        let handle = tokio::spawn(watchdog_loop(
            Arc::clone(&self.probe),
            Arc::clone(&self.health),
            self.config.clone(),
            Arc::clone(&self.metrics),
            shutdown_rx,
        ));
        *self.loop_handle.lock() = Some(handle);
    }

    /// Signal shutdown and wait for the loop to observe it (within one
    /// check interval).
    pub async fn shutdown(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(true);
        }
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for StoreWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWatchdog")
            .field("target", &self.probe.target())
            .field("config", &self.config)
            .finish()
    }
}

/// The watchdog execution loop.
async fn watchdog_loop(
    probe: Arc<dyn StoreProbe>,
    health: Arc<HealthAggregator>,
    config: WatchdogConfig,
    metrics: Arc<WatchdogMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let target = probe.target();
    tracing::info!(
        store = %target,
        check_interval_secs = config.check_interval.as_secs_f64(),
        "Store watchdog started"
    );

    let mut consecutive_failures = 0u32;
    let mut last_recovery: Option<tokio::time::Instant> = None;
    let mut escalated = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!(store = %target, "Store watchdog shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                metrics.checks.fetch_add(1, Ordering::Relaxed);
                let alive = probe.check().await;

                if alive {
                    if consecutive_failures > 0 {
                        tracing::info!(
                            store = %target,
                            after_failures = consecutive_failures,
                            "Backend reachable again"
                        );
                    }
                    consecutive_failures = 0;
                    if escalated {
                        health.clear_backend_unreachable();
                        escalated = false;
                    }
                    continue;
                }

                consecutive_failures += 1;
                metrics.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    store = %target,
                    consecutive = consecutive_failures,
                    "Backend liveness check failed"
                );

                // Debounced recovery, performed with no lock held.
                let may_recover = last_recovery
                    .map(|at| at.elapsed() >= config.debounce)
                    .unwrap_or(true);
                if may_recover {
                    last_recovery = Some(tokio::time::Instant::now());
                    metrics.recovery_attempts.fetch_add(1, Ordering::Relaxed);
                    match probe.recover().await {
                        Ok(()) => {
                            tracing::info!(store = %target, "Recovery action completed");
                        }
                        Err(error) => {
                            tracing::error!(
                                store = %target,
                                error = %error,
                                "Recovery action failed"
                            );
                        }
                    }
                }

                if consecutive_failures > config.retry_ceiling && !escalated {
                    metrics.escalations.fetch_add(1, Ordering::Relaxed);
                    health.set_backend_unreachable(format!(
                        "{} failed {} consecutive liveness checks",
                        target, consecutive_failures
                    ));
                    escalated = true;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
