//! Stratum Runtime - Adaptive Layer over a Document/Embedding Store
//!
//! This crate makes repeated store operations faster and the store's
//! behavior observable and self-tuning:
//!
//! - [`cache::ResultCache`]: bounded LRU result cache with per-entry
//!   TTL, partitioned by scope.
//! - [`trails::TrailTracker`]: pattern-reinforcement weights with time
//!   decay, hot-trail ranking, and thrash-smell detection.
//! - [`health::HealthAggregator`]: rolling-window operation/error/latency
//!   counters, host resource snapshots, and status classification.
//! - [`scheduler::MaintenanceScheduler`]: named jobs on fixed intervals
//!   driving cleanup, decay, and snapshots, plus the store watchdog.
//! - [`advisor::ScalingAdvisor`]: pure scaling recommendations derived
//!   from the latest snapshots.
//!
//! [`runtime::AdaptiveRuntime`] wires one instance of each together and
//! is the intended entry point for embedders.

pub mod advisor;
pub mod cache;
pub mod constants;
pub mod health;
pub mod runtime;
pub mod scheduler;
pub mod trails;

pub use advisor::{AdvisorConfig, ScalingAdvisor};
pub use cache::{CacheConfig, CacheStats, EntryMetadata, ResultCache, ScopedKey};
pub use health::{HealthAggregator, HealthConfig};
pub use runtime::{
    AdaptiveRuntime, RuntimeConfig, StoreExecutor, JOB_CACHE_CLEANUP, JOB_HEALTH_SNAPSHOT,
    JOB_TRAIL_DECAY,
};
pub use scheduler::{
    FileStoreProbe, IntervalSpec, JobAction, JobSnapshot, MaintenanceScheduler, SchedulerConfig,
    StoreProbe, StoreWatchdog, WatchdogConfig,
};
pub use trails::{HotTrail, ScopePatternSummary, Smell, TrailConfig, TrailTracker};
