//! Constants for the Stratum runtime
//!
//! This module contains all default tunables used throughout the runtime.
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// RESULT CACHE
// ============================================================================

/// Default maximum number of cache entries across all scopes
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Default time-to-live for cached values in seconds (1 hour)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Maximum accepted time-to-live in seconds (7 days)
pub const DEFAULT_CACHE_MAX_TTL_SECS: u64 = 604_800;

// ============================================================================
// TRAIL TRACKER
// ============================================================================

/// Weight added per reinforcement
pub const DEFAULT_REINFORCEMENT_AMOUNT: f64 = 0.1;

/// Ceiling a trail's weight is clamped to on reinforcement
pub const DEFAULT_WEIGHT_CEILING: f64 = 1.0;

/// Multiplicative decay factor applied per decay cycle
pub const DEFAULT_DECAY_FACTOR: f64 = 0.9;

/// Length of one decay cycle in seconds
pub const DEFAULT_DECAY_INTERVAL_SECS: u64 = 60;

/// Trails decayed below this weight are pruned
pub const DEFAULT_PRUNE_FLOOR: f64 = 0.01;

/// Minimum hit count before a pattern can be flagged as a smell
pub const DEFAULT_SMELL_VOLUME_THRESHOLD: u64 = 25;

/// Mean inter-reinforcement interval below which a high-volume pattern
/// is considered thrashing, in milliseconds
pub const DEFAULT_SMELL_THRASH_MS: u64 = 2000;

/// Length of the reinforcement-volume window in seconds (two halves)
pub const DEFAULT_VOLUME_WINDOW_SECS: u64 = 600;

// ============================================================================
// HEALTH AGGREGATOR
// ============================================================================

/// Length of the rolling health window in seconds (5 minutes)
pub const DEFAULT_HEALTH_WINDOW_SECS: u64 = 300;

/// Width of one health counter bucket in seconds
pub const DEFAULT_HEALTH_BUCKET_SECS: u64 = 10;

/// Windowed error rate at or above which status is degraded
pub const DEFAULT_SOFT_ERROR_RATE: f64 = 0.10;

/// Windowed error rate at or above which status is unhealthy
pub const DEFAULT_HARD_ERROR_RATE: f64 = 0.50;

/// Resource percentage at or above which status is degraded
pub const DEFAULT_SOFT_RESOURCE_PERCENT: f32 = 80.0;

/// Resource percentage at or above which status is unhealthy
pub const DEFAULT_HARD_RESOURCE_PERCENT: f32 = 95.0;

// ============================================================================
// MAINTENANCE SCHEDULER
// ============================================================================

/// Scheduler loop tick in seconds
pub const DEFAULT_SCHEDULER_TICK_SECS: u64 = 1;

/// Default period of the health resource-snapshot job (5 minutes)
pub const DEFAULT_HEALTH_SNAPSHOT_INTERVAL_SECS: u64 = 300;

/// Default period of the cache cleanup job (1 hour)
pub const DEFAULT_CACHE_CLEANUP_INTERVAL_SECS: u64 = 3600;

// ============================================================================
// STORE WATCHDOG
// ============================================================================

/// Liveness check period in seconds
pub const DEFAULT_WATCHDOG_CHECK_INTERVAL_SECS: u64 = 10;

/// Minimum spacing between recovery attempts in seconds
pub const DEFAULT_WATCHDOG_DEBOUNCE_SECS: u64 = 5;

/// Consecutive failed checks beyond which the watchdog escalates to
/// an unhealthy report
pub const DEFAULT_WATCHDOG_RETRY_CEILING: u32 = 3;

// ============================================================================
// SCALING ADVISOR
// ============================================================================

/// Resource percentage below which the host is considered well under
/// the soft ceiling
pub const DEFAULT_ADVISOR_LOW_RESOURCE_PERCENT: f32 = 30.0;

/// Current-over-previous volume ratio above which volume counts as rising
pub const DEFAULT_ADVISOR_VOLUME_RISE_FACTOR: f64 = 1.5;

/// Reinforcements per minute below which volume counts as low
pub const DEFAULT_ADVISOR_LOW_VOLUME_PER_MIN: f64 = 1.0;
