//! The adaptive runtime facade.
//!
//! Constructs one instance of each component at startup and exposes one
//! entry point per capability - explicit dependency injection instead of
//! global singletons, so the request path and the scheduler share the
//! same instances by reference and components stay unit-testable in
//! isolation.
//!
//! Control flow per store operation: the read path consults the result
//! cache first (filling misses through the caller-supplied compute or
//! the [`StoreExecutor`]), mutations write through with scope
//! invalidation, and every operation unconditionally reports to the
//! health aggregator and the trail tracker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use stratum_core::{
    HealthReport, OperationKind, PatternSignature, ScalingRecommendation, ScopeId, StratumResult,
    ValidationError, VolumeSignal,
};

use crate::advisor::{AdvisorConfig, ScalingAdvisor};
use crate::cache::{CacheConfig, CacheStats, ResultCache, ScopedKey};
use crate::health::{HealthAggregator, HealthConfig};
use crate::scheduler::{
    IntervalSpec, JobAction, JobSnapshot, MaintenanceScheduler, SchedulerConfig, StoreProbe,
    StoreWatchdog, WatchdogConfig,
};
use crate::trails::{HotTrail, ScopePatternSummary, Smell, TrailConfig, TrailTracker};

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// The narrow contract consumed from the store collaborator.
///
/// The runtime calls this ONLY to fill a cache miss - the cache never
/// initiates a store call on its own, and no Stratum lock is held
/// across the call.
#[async_trait]
pub trait StoreExecutor: Send + Sync {
    async fn execute(&self, kind: OperationKind, args: &Value) -> StratumResult<Value>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Aggregate configuration for the whole runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub trails: TrailConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
    pub watchdog: WatchdogConfig,
    pub advisor: AdvisorConfig,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every component's configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            trails: TrailConfig::from_env(),
            health: HealthConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            watchdog: WatchdogConfig::from_env(),
            advisor: AdvisorConfig::from_env(),
        }
    }

    /// Validate every component's configuration. Invalid values are
    /// fatal at setup, never silently defaulted.
    pub fn validate(&self) -> Result<(), stratum_core::ConfigError> {
        self.cache.validate()?;
        self.trails.validate()?;
        self.health.validate()?;
        self.scheduler.validate()?;
        self.watchdog.validate()?;
        self.advisor.validate()?;
        Ok(())
    }
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Names of the jobs registered at construction.
pub const JOB_HEALTH_SNAPSHOT: &str = "health_snapshot";
pub const JOB_CACHE_CLEANUP: &str = "cache_cleanup";
pub const JOB_TRAIL_DECAY: &str = "trail_decay";

/// One instance of each component, wired together once at process
/// startup.
pub struct AdaptiveRuntime {
    cache: Arc<ResultCache>,
    trails: Arc<TrailTracker>,
    health: Arc<HealthAggregator>,
    scheduler: Arc<MaintenanceScheduler>,
    advisor: ScalingAdvisor,
}

impl AdaptiveRuntime {
    /// Build the runtime and register the default maintenance jobs
    /// (health snapshot, cache cleanup, trail decay). The background
    /// loop does not run until [`start`](Self::start).
    pub fn new(config: RuntimeConfig) -> StratumResult<Self> {
        config.validate()?;

        let cache = Arc::new(ResultCache::new(config.cache.clone())?);
        let trails = Arc::new(TrailTracker::new(config.trails.clone())?);
        let health = Arc::new(HealthAggregator::new(config.health.clone())?);
        let scheduler = Arc::new(MaintenanceScheduler::new(config.scheduler.clone())?);
        let advisor = ScalingAdvisor::new(
            config.advisor.clone(),
            config.health.soft_resource_percent,
            config.health.hard_resource_percent,
        )?;

        // Default jobs. Each action clones its component Arc; none of
        // them can fail in a way that should unschedule them.
        let snapshot_health = Arc::clone(&health);
        scheduler.schedule(
            JOB_HEALTH_SNAPSHOT,
            IntervalSpec::Every(config.scheduler.health_snapshot_interval),
            Arc::new(move || {
                snapshot_health.snapshot_resources();
                Ok(())
            }),
        )?;

        let cleanup_cache = Arc::clone(&cache);
        scheduler.schedule(
            JOB_CACHE_CLEANUP,
            IntervalSpec::Every(config.scheduler.cache_cleanup_interval),
            Arc::new(move || {
                let expired = cleanup_cache.cleanup();
                if expired > 0 {
                    tracing::info!(expired, "Cache cleanup removed expired entries");
                }
                Ok(())
            }),
        )?;

        let decay_trails = Arc::clone(&trails);
        scheduler.schedule(
            JOB_TRAIL_DECAY,
            IntervalSpec::Every(config.trails.decay_interval),
            Arc::new(move || {
                let pruned = decay_trails.decay();
                if pruned > 0 {
                    tracing::debug!(pruned, "Trail decay pruned faded patterns");
                }
                Ok(())
            }),
        )?;

        Ok(Self {
            cache,
            trails,
            health,
            scheduler,
            advisor,
        })
    }

    /// Build the runtime with default configuration.
    pub fn with_defaults() -> StratumResult<Self> {
        Self::new(RuntimeConfig::default())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the maintenance loop.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Attach a store watchdog; the scheduler owns its lifecycle from
    /// here on and stops it on shutdown.
    pub fn attach_watchdog(
        &self,
        probe: Arc<dyn StoreProbe>,
        config: WatchdogConfig,
    ) -> StratumResult<()> {
        let watchdog = StoreWatchdog::new(probe, Arc::clone(&self.health), config)?;
        self.scheduler.attach_watchdog(watchdog);
        Ok(())
    }

    /// Graceful shutdown: signal the loops once; each observes it
    /// within one tick with no job interrupted mid-execution.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Cache path
    // ------------------------------------------------------------------

    /// Check-then-fill: return the cached value for this operation, or
    /// run `compute` and cache its result under `ttl`.
    ///
    /// No single-flight: duplicate concurrent misses may both compute,
    /// and the last write wins. The compute runs with no Stratum lock
    /// held.
    pub async fn lookup_or_compute<F, Fut>(
        &self,
        scope: &ScopeId,
        kind: OperationKind,
        collection: &str,
        args: &Value,
        ttl: Option<Duration>,
        compute: F,
    ) -> StratumResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StratumResult<Value>>,
    {
        let key = ScopedKey::new(scope.clone(), kind, collection, args);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.cache.set(key, value.clone(), ttl)?;
        Ok(value)
    }

    /// Route an operation through the store collaborator: queries fill
    /// the cache, mutations execute and then invalidate the scope's
    /// cached results (coarse write-through invalidation).
    pub async fn execute_cached(
        &self,
        store: &dyn StoreExecutor,
        scope: &ScopeId,
        kind: OperationKind,
        collection: &str,
        args: &Value,
        ttl: Option<Duration>,
    ) -> StratumResult<Value> {
        if kind.is_mutation() {
            let result = store.execute(kind, args).await?;
            let invalidated = self.cache.invalidate_scope(scope);
            if invalidated > 0 {
                tracing::debug!(
                    scope = %scope,
                    invalidated,
                    "Mutation invalidated cached results"
                );
            }
            return Ok(result);
        }
        self.lookup_or_compute(scope, kind, collection, args, ttl, || {
            store.execute(kind, args)
        })
        .await
    }

    /// Drop a scope's cached results. Returns the count removed.
    pub fn invalidate_scope(&self, scope: &ScopeId) -> u64 {
        self.cache.invalidate_scope(scope)
    }

    /// Cache occupancy and hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Entries currently cached for one scope.
    pub fn scope_cache_len(&self, scope: &ScopeId) -> usize {
        self.cache.scope_len(scope)
    }

    // ------------------------------------------------------------------
    // Reporting path
    // ------------------------------------------------------------------

    /// Fan an operation outcome out to the health aggregator and the
    /// trail tracker. Called unconditionally for every store operation.
    pub fn record_operation(
        &self,
        scope: &ScopeId,
        kind: OperationKind,
        collection: &str,
        duration: Duration,
        success: bool,
        filter: Option<&Value>,
    ) {
        self.health.record(kind, duration, success);
        self.health.record_collection(collection);
        self.trails
            .reinforce(scope, PatternSignature::new(kind, collection, filter));
    }

    /// Attach detail to the most recent failure.
    pub fn note_error(&self, message: impl Into<String>) {
        self.health.note_error(message);
    }

    /// Current health classification and windowed metrics.
    pub fn health(&self) -> HealthReport {
        self.health.status()
    }

    /// The hottest access patterns in a scope. `limit` must be at
    /// least 1.
    pub fn hot_trails(&self, scope: &ScopeId, limit: usize) -> StratumResult<Vec<HotTrail>> {
        if limit == 0 {
            return Err(ValidationError::InvalidValue {
                field: "limit".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(self.trails.hot_trails(scope, limit))
    }

    /// Patterns flagged as likely caching or query-shape inefficiencies.
    pub fn smells(&self, scope: &ScopeId) -> Vec<Smell> {
        self.trails.detect_smells(scope)
    }

    /// Activity summary for a scope.
    pub fn scope_patterns(&self, scope: &ScopeId) -> ScopePatternSummary {
        self.trails.scope_patterns(scope)
    }

    /// Derive a scaling recommendation from the latest snapshots.
    /// Never cached - every call reflects the current state.
    pub fn scaling_recommendation(&self) -> ScalingRecommendation {
        let report = self.health.status();
        let volume = self.trails.volume_signal();
        self.advisor.recommend(&report, &volume)
    }

    /// The advisor's current volume signal (exposed for inspection).
    pub fn volume_signal(&self) -> VolumeSignal {
        self.trails.volume_signal()
    }

    // ------------------------------------------------------------------
    // Scheduling path
    // ------------------------------------------------------------------

    /// Register a custom maintenance job.
    pub fn schedule_job(
        &self,
        name: impl Into<String>,
        interval: IntervalSpec,
        action: JobAction,
    ) -> StratumResult<()> {
        self.scheduler.schedule(name, interval, action)
    }

    /// Remove a job. Idempotent.
    pub fn unschedule_job(&self, name: &str) -> bool {
        self.scheduler.unschedule(name)
    }

    /// Snapshot of the job table.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.scheduler.jobs()
    }

    // ------------------------------------------------------------------
    // Component access for embedders and tests
    // ------------------------------------------------------------------

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn trails(&self) -> &Arc<TrailTracker> {
        &self.trails
    }

    pub fn health_aggregator(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn scheduler(&self) -> &Arc<MaintenanceScheduler> {
        &self.scheduler
    }
}

impl std::fmt::Debug for AdaptiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRuntime")
            .field("cache", &self.cache)
            .field("trails", &self.trails)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
