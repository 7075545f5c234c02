//! Pattern-reinforcement tracking with time decay.
//!
//! Every observed operation reinforces a trail keyed by
//! `(scope, pattern signature)`. Weights are clamped to a ceiling on
//! reinforcement and multiplicatively decayed by the maintenance
//! scheduler, so frequently used access paths stay hot while stale ones
//! fade out and are eventually pruned. The tracker also flags
//! "smells" - patterns hammered so fast that a cache or query-shape
//! problem upstream is the likeliest explanation - and feeds a global
//! reinforcement-volume signal to the scaling advisor.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use stratum_core::{
    ConfigError, OperationKind, PatternSignature, ScopeId, Timestamp, VolumeSignal,
};

use crate::constants::{
    DEFAULT_DECAY_FACTOR, DEFAULT_DECAY_INTERVAL_SECS, DEFAULT_PRUNE_FLOOR,
    DEFAULT_REINFORCEMENT_AMOUNT, DEFAULT_SMELL_THRASH_MS, DEFAULT_SMELL_VOLUME_THRESHOLD,
    DEFAULT_VOLUME_WINDOW_SECS, DEFAULT_WEIGHT_CEILING,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the trail tracker.
///
/// The smell thresholds are heuristics, not exact detection: a pattern
/// is flagged when it has been reinforced more than
/// `smell_volume_threshold` times AND the mean spacing between
/// reinforcements is under `smell_thrash_threshold`. Tune both to the
/// workload; the defaults suit interactive query traffic.
#[derive(Debug, Clone)]
pub struct TrailConfig {
    /// Weight added per reinforcement.
    pub reinforcement_amount: f64,
    /// Ceiling the weight is clamped to on reinforcement.
    pub weight_ceiling: f64,
    /// Multiplicative factor applied per elapsed decay cycle (< 1).
    pub decay_factor: f64,
    /// Length of one decay cycle.
    pub decay_interval: Duration,
    /// Trails decayed below this weight are pruned.
    pub prune_floor: f64,
    /// Minimum hit count before a pattern can be flagged.
    pub smell_volume_threshold: u64,
    /// Mean inter-reinforcement interval below which a high-volume
    /// pattern counts as thrashing.
    pub smell_thrash_threshold: Duration,
    /// Length of the reinforcement-volume window (split into two halves
    /// for the rising/low comparison).
    pub volume_window: Duration,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            reinforcement_amount: DEFAULT_REINFORCEMENT_AMOUNT,
            weight_ceiling: DEFAULT_WEIGHT_CEILING,
            decay_factor: DEFAULT_DECAY_FACTOR,
            decay_interval: Duration::from_secs(DEFAULT_DECAY_INTERVAL_SECS),
            prune_floor: DEFAULT_PRUNE_FLOOR,
            smell_volume_threshold: DEFAULT_SMELL_VOLUME_THRESHOLD,
            smell_thrash_threshold: Duration::from_millis(DEFAULT_SMELL_THRASH_MS),
            volume_window: Duration::from_secs(DEFAULT_VOLUME_WINDOW_SECS),
        }
    }
}

impl TrailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reinforcement_amount(mut self, amount: f64) -> Self {
        self.reinforcement_amount = amount;
        self
    }

    pub fn with_weight_ceiling(mut self, ceiling: f64) -> Self {
        self.weight_ceiling = ceiling;
        self
    }

    pub fn with_decay_factor(mut self, factor: f64) -> Self {
        self.decay_factor = factor;
        self
    }

    pub fn with_decay_interval(mut self, interval: Duration) -> Self {
        self.decay_interval = interval;
        self
    }

    pub fn with_prune_floor(mut self, floor: f64) -> Self {
        self.prune_floor = floor;
        self
    }

    pub fn with_smell_thresholds(mut self, volume: u64, thrash: Duration) -> Self {
        self.smell_volume_threshold = volume;
        self.smell_thrash_threshold = thrash;
        self
    }

    /// Create TrailConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_TRAIL_REINFORCEMENT`: Weight per reinforcement (default: 0.1)
    /// - `STRATUM_TRAIL_CEILING`: Weight ceiling (default: 1.0)
    /// - `STRATUM_TRAIL_DECAY_FACTOR`: Per-cycle decay factor (default: 0.9)
    /// - `STRATUM_TRAIL_DECAY_INTERVAL_SECS`: Decay cycle length (default: 60)
    /// - `STRATUM_TRAIL_PRUNE_FLOOR`: Prune threshold (default: 0.01)
    /// - `STRATUM_TRAIL_SMELL_VOLUME`: Smell hit-count threshold (default: 25)
    /// - `STRATUM_TRAIL_SMELL_THRASH_MS`: Smell interval threshold (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reinforcement_amount: std::env::var("STRATUM_TRAIL_REINFORCEMENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reinforcement_amount),
            weight_ceiling: std::env::var("STRATUM_TRAIL_CEILING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.weight_ceiling),
            decay_factor: std::env::var("STRATUM_TRAIL_DECAY_FACTOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.decay_factor),
            decay_interval: std::env::var("STRATUM_TRAIL_DECAY_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.decay_interval),
            prune_floor: std::env::var("STRATUM_TRAIL_PRUNE_FLOOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.prune_floor),
            smell_volume_threshold: std::env::var("STRATUM_TRAIL_SMELL_VOLUME")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.smell_volume_threshold),
            smell_thrash_threshold: std::env::var("STRATUM_TRAIL_SMELL_THRASH_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.smell_thrash_threshold),
            volume_window: defaults.volume_window,
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reinforcement_amount <= 0.0 || !self.reinforcement_amount.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "trails.reinforcement_amount".to_string(),
                value: self.reinforcement_amount.to_string(),
                reason: "must be positive and finite".to_string(),
            });
        }
        if self.weight_ceiling <= 0.0 || !self.weight_ceiling.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "trails.weight_ceiling".to_string(),
                value: self.weight_ceiling.to_string(),
                reason: "must be positive and finite".to_string(),
            });
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "trails.decay_factor".to_string(),
                value: self.decay_factor.to_string(),
                reason: "must be strictly between 0 and 1".to_string(),
            });
        }
        if self.decay_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "trails.decay_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.prune_floor < 0.0 || self.prune_floor >= self.weight_ceiling {
            return Err(ConfigError::InvalidValue {
                field: "trails.prune_floor".to_string(),
                value: self.prune_floor.to_string(),
                reason: "must be non-negative and below the weight ceiling".to_string(),
            });
        }
        if self.smell_volume_threshold < 2 {
            return Err(ConfigError::InvalidValue {
                field: "trails.smell_volume_threshold".to_string(),
                value: self.smell_volume_threshold.to_string(),
                reason: "needs at least two hits to define an interval".to_string(),
            });
        }
        if self.volume_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "trails.volume_window".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TRAIL STATE
// ============================================================================

#[derive(Debug, Clone)]
struct Trail {
    weight: f64,
    hit_count: u64,
    first_seen_at: Timestamp,
    last_reinforced_at: Timestamp,
    /// Decay bookkeeping anchor: the point up to which decay has been
    /// applied. Re-anchored on reinforcement so decay measures idle
    /// time, not age.
    decayed_through: Timestamp,
}

impl Trail {
    /// Mean spacing between reinforcements. `None` below two hits.
    fn mean_interval(&self) -> Option<Duration> {
        if self.hit_count < 2 {
            return None;
        }
        let span = (self.last_reinforced_at - self.first_seen_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(span / (self.hit_count - 1) as u32)
    }
}

/// A ranked hot-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotTrail {
    pub pattern: PatternSignature,
    pub weight: f64,
    pub hit_count: u64,
    pub last_reinforced_at: Timestamp,
}

/// A pattern flagged as a likely caching or query-shape inefficiency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Smell {
    pub pattern: PatternSignature,
    pub hit_count: u64,
    pub mean_interval_ms: u64,
    pub description: String,
    pub detected_at: Timestamp,
}

/// Per-scope activity summary: pattern population and hit mix by
/// operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopePatternSummary {
    pub scope: ScopeId,
    pub patterns: usize,
    pub total_hits: u64,
    pub hits_by_kind: BTreeMap<String, u64>,
}

// ============================================================================
// VOLUME WINDOW
// ============================================================================

/// Bucketed count of reinforcements across all scopes, kept only for
/// the configured window. Feeds the scaling advisor's rising/low check.
#[derive(Debug)]
struct VolumeWindow {
    buckets: VecDeque<(Timestamp, u64)>,
    bucket_width: Duration,
    window: Duration,
}

impl VolumeWindow {
    fn new(window: Duration) -> Self {
        // Twelve buckets give the two window halves enough resolution.
        let bucket_width = window / 12;
        Self {
            buckets: VecDeque::new(),
            bucket_width: bucket_width.max(Duration::from_secs(1)),
            window,
        }
    }

    fn record(&mut self, now: Timestamp) {
        self.roll(now);
        match self.buckets.back_mut() {
            Some((start, count))
                if now.signed_duration_since(*start).to_std().unwrap_or_default()
                    < self.bucket_width =>
            {
                *count += 1;
            }
            _ => self.buckets.push_back((now, 1)),
        }
    }

    fn roll(&mut self, now: Timestamp) {
        let horizon = now - chrono::Duration::from_std(self.window).unwrap_or_default();
        while matches!(self.buckets.front(), Some((start, _)) if *start < horizon) {
            self.buckets.pop_front();
        }
    }

    fn signal(&mut self, now: Timestamp) -> VolumeSignal {
        self.roll(now);
        let half = self.window / 2;
        let boundary = now - chrono::Duration::from_std(half).unwrap_or_default();
        let (mut current, mut previous) = (0u64, 0u64);
        for (start, count) in &self.buckets {
            if *start >= boundary {
                current += count;
            } else {
                previous += count;
            }
        }
        let per_min = |count: u64| count as f64 / (half.as_secs_f64() / 60.0).max(f64::EPSILON);
        VolumeSignal {
            current_per_min: per_min(current),
            previous_per_min: per_min(previous),
        }
    }
}

// ============================================================================
// TRAIL TRACKER
// ============================================================================

/// Records a reinforcement weight per `(scope, pattern)` pair, decays
/// weights over time, and exposes ranked hot patterns and thrashing
/// smells.
///
/// One exclusive lock guards the trail map (reinforcement and ranking
/// are short map operations); the volume window has its own lock so the
/// advisor's read never contends with a decay sweep.
pub struct TrailTracker {
    trails: RwLock<HashMap<(ScopeId, PatternSignature), Trail>>,
    volume: Mutex<VolumeWindow>,
    config: TrailConfig,
}

impl TrailTracker {
    /// Create a tracker from a validated configuration.
    pub fn new(config: TrailConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let volume = VolumeWindow::new(config.volume_window);
        Ok(Self {
            trails: RwLock::new(HashMap::new()),
            volume: Mutex::new(volume),
            config,
        })
    }

    /// Create a tracker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TrailConfig::default()).expect("default trail config is valid")
    }

    pub fn config(&self) -> &TrailConfig {
        &self.config
    }

    /// Reinforce a pattern: add the configured amount to its weight
    /// (clamped to the ceiling), bump its hit count, and re-anchor its
    /// decay clock.
    pub fn reinforce(&self, scope: &ScopeId, pattern: PatternSignature) {
        self.reinforce_at(scope, pattern, Utc::now());
    }

    pub(crate) fn reinforce_at(
        &self,
        scope: &ScopeId,
        pattern: PatternSignature,
        now: Timestamp,
    ) {
        {
            let mut trails = self.trails.write();
            let trail = trails
                .entry((scope.clone(), pattern))
                .or_insert_with(|| Trail {
                    weight: 0.0,
                    hit_count: 0,
                    first_seen_at: now,
                    last_reinforced_at: now,
                    decayed_through: now,
                });
            trail.weight =
                (trail.weight + self.config.reinforcement_amount).min(self.config.weight_ceiling);
            trail.hit_count += 1;
            trail.last_reinforced_at = now;
            trail.decayed_through = now;
        }
        self.volume.lock().record(now);
    }

    /// Decay sweep, applied by the maintenance scheduler.
    ///
    /// For each trail, the weight is multiplied by
    /// `decay_factor ^ cycles` where `cycles` is the number of WHOLE
    /// decay intervals elapsed since the trail was last reinforced or
    /// decayed; partial cycles carry over to the next sweep. Trails
    /// decayed below the prune floor are removed, which bounds memory
    /// to active patterns. Returns the number pruned.
    pub fn decay(&self) -> usize {
        self.decay_at(Utc::now())
    }

    pub(crate) fn decay_at(&self, now: Timestamp) -> usize {
        let interval = chrono::Duration::from_std(self.config.decay_interval)
            .unwrap_or(chrono::Duration::seconds(1));
        let mut trails = self.trails.write();
        let before = trails.len();
        trails.retain(|_, trail| {
            let elapsed = now - trail.decayed_through;
            let cycles = (elapsed.num_milliseconds() / interval.num_milliseconds().max(1)) as i32;
            if cycles >= 1 {
                trail.weight *= self.config.decay_factor.powi(cycles);
                trail.decayed_through += interval * cycles;
            }
            trail.weight >= self.config.prune_floor
        });
        before - trails.len()
    }

    /// The hottest patterns in a scope, descending by weight, ties
    /// broken by higher hit count, then by more recent reinforcement.
    pub fn hot_trails(&self, scope: &ScopeId, limit: usize) -> Vec<HotTrail> {
        let trails = self.trails.read();
        let mut hot: Vec<HotTrail> = trails
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((_, pattern), trail)| HotTrail {
                pattern: pattern.clone(),
                weight: trail.weight,
                hit_count: trail.hit_count,
                last_reinforced_at: trail.last_reinforced_at,
            })
            .collect();
        hot.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then(b.hit_count.cmp(&a.hit_count))
                .then(b.last_reinforced_at.cmp(&a.last_reinforced_at))
        });
        hot.truncate(limit);
        hot
    }

    /// Flag patterns reinforced in rapid succession at high volume.
    ///
    /// A flagged pattern has more hits than the volume threshold and a
    /// mean inter-reinforcement interval under the thrashing threshold -
    /// the signature of the same expensive request replayed in a tight
    /// loop instead of being cached upstream.
    pub fn detect_smells(&self, scope: &ScopeId) -> Vec<Smell> {
        self.detect_smells_at(scope, Utc::now())
    }

    pub(crate) fn detect_smells_at(&self, scope: &ScopeId, now: Timestamp) -> Vec<Smell> {
        let trails = self.trails.read();
        let mut smells: Vec<Smell> = trails
            .iter()
            .filter(|((s, _), _)| s == scope)
            .filter_map(|((_, pattern), trail)| {
                if trail.hit_count <= self.config.smell_volume_threshold {
                    return None;
                }
                let mean = trail.mean_interval()?;
                if mean >= self.config.smell_thrash_threshold {
                    return None;
                }
                Some(Smell {
                    pattern: pattern.clone(),
                    hit_count: trail.hit_count,
                    mean_interval_ms: mean.as_millis() as u64,
                    description: format!(
                        "{} reinforced {} times at a mean interval of {}ms; \
                         repeated identical requests should be cached or batched",
                        pattern,
                        trail.hit_count,
                        mean.as_millis()
                    ),
                    detected_at: now,
                })
            })
            .collect();
        smells.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        smells
    }

    /// Reinforcement-volume signal across all scopes for the advisor.
    pub fn volume_signal(&self) -> VolumeSignal {
        self.volume_signal_at(Utc::now())
    }

    pub(crate) fn volume_signal_at(&self, now: Timestamp) -> VolumeSignal {
        self.volume.lock().signal(now)
    }

    /// Activity summary for a scope: pattern population and hit mix.
    pub fn scope_patterns(&self, scope: &ScopeId) -> ScopePatternSummary {
        let trails = self.trails.read();
        let mut total_hits = 0u64;
        let mut hits_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut patterns = 0usize;
        for ((s, pattern), trail) in trails.iter() {
            if s != scope {
                continue;
            }
            patterns += 1;
            total_hits += trail.hit_count;
            *hits_by_kind
                .entry(pattern.kind().as_str().to_string())
                .or_default() += trail.hit_count;
        }
        ScopePatternSummary {
            scope: scope.clone(),
            patterns,
            total_hits,
            hits_by_kind,
        }
    }

    /// Trails currently tracked across all scopes.
    pub fn len(&self) -> usize {
        self.trails.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn weight_of(&self, scope: &ScopeId, pattern: &PatternSignature) -> Option<f64> {
        self.trails
            .read()
            .get(&(scope.clone(), pattern.clone()))
            .map(|t| t.weight)
    }
}

impl std::fmt::Debug for TrailTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrailTracker")
            .field("trails", &self.trails.read().len())
            .field("config", &self.config)
            .finish()
    }
}

/// Helper used by trackers and tests to derive a signature for plain
/// query traffic against a collection.
pub fn query_pattern(collection: &str, filter: Option<&serde_json::Value>) -> PatternSignature {
    PatternSignature::new(OperationKind::Query, collection, filter)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(name: &str) -> ScopeId {
        ScopeId::new(name).unwrap()
    }

    fn tracker() -> TrailTracker {
        TrailTracker::with_defaults()
    }

    fn pattern(collection: &str) -> PatternSignature {
        query_pattern(collection, None)
    }

    #[test]
    fn test_reinforce_accumulates_weight() {
        let tracker = tracker();
        let s = scope("t");
        let now = Utc::now();
        for _ in 0..3 {
            tracker.reinforce_at(&s, pattern("docs"), now);
        }
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_reinforce_clamps_to_ceiling() {
        let tracker = TrailTracker::new(
            TrailConfig::default()
                .with_reinforcement_amount(0.4)
                .with_weight_ceiling(1.0),
        )
        .unwrap();
        let s = scope("t");
        let now = Utc::now();
        for _ in 0..5 {
            tracker.reinforce_at(&s, pattern("docs"), now);
        }
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_decay_applies_factor_per_cycle() {
        let config = TrailConfig::default()
            .with_decay_factor(0.5)
            .with_decay_interval(Duration::from_secs(60))
            .with_prune_floor(0.0001);
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), t0); // weight 0.1

        // Three whole cycles elapse.
        tracker.decay_at(t0 + chrono::Duration::seconds(180));
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 0.1 * 0.5f64.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn test_decay_over_repeated_sweeps_compounds() {
        let config = TrailConfig::default()
            .with_decay_factor(0.8)
            .with_decay_interval(Duration::from_secs(60))
            .with_prune_floor(0.0001);
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), t0);

        for n in 1..=4 {
            tracker.decay_at(t0 + chrono::Duration::seconds(60 * n));
        }
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 0.1 * 0.8f64.powi(4)).abs() < 1e-9);
    }

    #[test]
    fn test_decay_partial_cycle_is_deferred() {
        let tracker = TrailTracker::new(
            TrailConfig::default().with_decay_interval(Duration::from_secs(60)),
        )
        .unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), t0);

        tracker.decay_at(t0 + chrono::Duration::seconds(30));
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_decay_prunes_below_floor() {
        let config = TrailConfig::default()
            .with_decay_factor(0.1)
            .with_decay_interval(Duration::from_secs(60))
            .with_prune_floor(0.05);
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), t0); // weight 0.1

        // One cycle: 0.1 * 0.1 = 0.01 < floor 0.05 -> pruned.
        let pruned = tracker.decay_at(t0 + chrono::Duration::seconds(60));
        assert_eq!(pruned, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reinforcement_re_anchors_decay() {
        let config = TrailConfig::default()
            .with_decay_factor(0.5)
            .with_decay_interval(Duration::from_secs(60));
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), t0);
        // Reinforced again just before the sweep: no whole idle cycle.
        tracker.reinforce_at(&s, pattern("docs"), t0 + chrono::Duration::seconds(59));

        tracker.decay_at(t0 + chrono::Duration::seconds(60));
        let weight = tracker.weight_of(&s, &pattern("docs")).unwrap();
        assert!((weight - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_hot_trails_ordering() {
        let tracker = tracker();
        let s = scope("t");
        let now = Utc::now();
        for _ in 0..3 {
            tracker.reinforce_at(&s, pattern("hot"), now);
        }
        tracker.reinforce_at(&s, pattern("cold"), now);

        let hot = tracker.hot_trails(&s, 10);
        assert_eq!(hot.len(), 2);
        assert_eq!(hot[0].pattern.collection(), "hot");
        assert_eq!(hot[1].pattern.collection(), "cold");
    }

    #[test]
    fn test_hot_trails_tie_broken_by_hit_count() {
        // Equal weights via the ceiling; different hit counts.
        let config = TrailConfig::default()
            .with_reinforcement_amount(0.6)
            .with_weight_ceiling(1.0);
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let now = Utc::now();
        for _ in 0..2 {
            tracker.reinforce_at(&s, pattern("two-hits"), now);
        }
        for _ in 0..5 {
            tracker.reinforce_at(&s, pattern("five-hits"), now);
        }

        let hot = tracker.hot_trails(&s, 10);
        assert_eq!(hot[0].pattern.collection(), "five-hits");
        assert!((hot[0].weight - hot[1].weight).abs() < 1e-9);
        assert!(hot[0].hit_count > hot[1].hit_count);
    }

    #[test]
    fn test_hot_trails_scope_isolated() {
        let tracker = tracker();
        let now = Utc::now();
        tracker.reinforce_at(&scope("a"), pattern("docs"), now);
        tracker.reinforce_at(&scope("b"), pattern("docs"), now);

        assert_eq!(tracker.hot_trails(&scope("a"), 10).len(), 1);
        assert_eq!(tracker.hot_trails(&scope("b"), 10).len(), 1);
        assert!(tracker.hot_trails(&scope("c"), 10).is_empty());
    }

    #[test]
    fn test_hot_trails_respects_limit() {
        let tracker = tracker();
        let s = scope("t");
        let now = Utc::now();
        for i in 0..8 {
            tracker.reinforce_at(&s, pattern(&format!("c{}", i)), now);
        }
        assert_eq!(tracker.hot_trails(&s, 3).len(), 3);
    }

    #[test]
    fn test_detect_smells_flags_thrashing() {
        let config = TrailConfig::default()
            .with_smell_thresholds(10, Duration::from_millis(500));
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        // 20 hits, 100ms apart: mean interval 100ms, well under 500ms.
        for i in 0..20 {
            tracker.reinforce_at(&s, pattern("docs"), t0 + chrono::Duration::milliseconds(100 * i));
        }

        let smells = tracker.detect_smells_at(&s, t0 + chrono::Duration::seconds(5));
        assert_eq!(smells.len(), 1);
        assert_eq!(smells[0].hit_count, 20);
        assert!(smells[0].mean_interval_ms <= 150);
    }

    #[test]
    fn test_detect_smells_ignores_slow_patterns() {
        let config = TrailConfig::default()
            .with_smell_thresholds(10, Duration::from_millis(500));
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        // 20 hits, 10s apart: high volume but not thrashing.
        for i in 0..20 {
            tracker.reinforce_at(&s, pattern("docs"), t0 + chrono::Duration::seconds(10 * i));
        }
        assert!(tracker.detect_smells(&s).is_empty());
    }

    #[test]
    fn test_detect_smells_ignores_low_volume() {
        let config = TrailConfig::default()
            .with_smell_thresholds(10, Duration::from_millis(500));
        let tracker = TrailTracker::new(config).unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        // Fast but only 5 hits.
        for i in 0..5 {
            tracker.reinforce_at(&s, pattern("docs"), t0 + chrono::Duration::milliseconds(50 * i));
        }
        assert!(tracker.detect_smells(&s).is_empty());
    }

    #[test]
    fn test_volume_signal_reflects_recent_rate() {
        let tracker = TrailTracker::new(
            TrailConfig::default(), // 600s window, 300s halves
        )
        .unwrap();
        let s = scope("t");
        let t0 = Utc::now();
        // 30 reinforcements in the previous half, 90 in the current.
        for i in 0..30 {
            tracker.reinforce_at(&s, pattern("docs"), t0 + chrono::Duration::seconds(i));
        }
        let later = t0 + chrono::Duration::seconds(320);
        for i in 0..90 {
            tracker.reinforce_at(&s, pattern("docs"), later + chrono::Duration::seconds(i));
        }

        let signal = tracker.volume_signal_at(later + chrono::Duration::seconds(100));
        assert!(signal.current_per_min > signal.previous_per_min);
        assert!(signal.is_rising(1.5));
    }

    #[test]
    fn test_scope_patterns_summary() {
        let tracker = tracker();
        let s = scope("t");
        let now = Utc::now();
        tracker.reinforce_at(&s, pattern("docs"), now);
        tracker.reinforce_at(&s, pattern("docs"), now);
        tracker.reinforce_at(
            &s,
            PatternSignature::new(OperationKind::Insert, "docs", None),
            now,
        );

        let summary = tracker.scope_patterns(&s);
        assert_eq!(summary.patterns, 2);
        assert_eq!(summary.total_hits, 3);
        assert_eq!(summary.hits_by_kind.get("query"), Some(&2));
        assert_eq!(summary.hits_by_kind.get("insert"), Some(&1));
    }

    #[test]
    fn test_config_validate_rejects_bad_decay_factor() {
        assert!(TrailConfig::default().with_decay_factor(1.0).validate().is_err());
        assert!(TrailConfig::default().with_decay_factor(0.0).validate().is_err());
        assert!(TrailConfig::default().with_decay_factor(-0.5).validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_floor_above_ceiling() {
        let config = TrailConfig::default()
            .with_weight_ceiling(0.5)
            .with_prune_floor(0.6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_negative_amount() {
        assert!(TrailConfig::default()
            .with_reinforcement_amount(-0.1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_filter_shape_distinguishes_patterns() {
        let tracker = tracker();
        let s = scope("t");
        let now = Utc::now();
        tracker.reinforce_at(&s, query_pattern("docs", Some(&json!({"author": "x"}))), now);
        tracker.reinforce_at(&s, query_pattern("docs", Some(&json!({"year": 2024}))), now);
        assert_eq!(tracker.hot_trails(&s, 10).len(), 2);
    }
}
