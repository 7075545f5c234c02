//! Scaling recommendations derived from health and trail snapshots.
//!
//! The advisor is a pure function of its inputs: it reads the latest
//! [`HealthReport`] and [`VolumeSignal`], performs no I/O, and holds no
//! interior state, so identical snapshots always produce identical
//! recommendations and tests can drive it from fixed fixtures.

use stratum_core::{
    ConfigError, HealthReport, ScalingDirection, ScalingRecommendation, VolumeSignal,
};

use crate::constants::{
    DEFAULT_ADVISOR_LOW_RESOURCE_PERCENT, DEFAULT_ADVISOR_LOW_VOLUME_PER_MIN,
    DEFAULT_ADVISOR_VOLUME_RISE_FACTOR,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the scaling advisor.
///
/// These thresholds are heuristics with sane defaults, exposed as
/// configuration rather than derived constants.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Resource percentage under which the host counts as well below
    /// the soft ceiling (scale-down territory).
    pub low_resource_percent: f32,
    /// Current-over-previous volume ratio above which volume is rising.
    pub volume_rise_factor: f64,
    /// Reinforcements per minute under which volume counts as low.
    pub low_volume_per_min: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            low_resource_percent: DEFAULT_ADVISOR_LOW_RESOURCE_PERCENT,
            volume_rise_factor: DEFAULT_ADVISOR_VOLUME_RISE_FACTOR,
            low_volume_per_min: DEFAULT_ADVISOR_LOW_VOLUME_PER_MIN,
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_low_resource_percent(mut self, percent: f32) -> Self {
        self.low_resource_percent = percent;
        self
    }

    pub fn with_volume_rise_factor(mut self, factor: f64) -> Self {
        self.volume_rise_factor = factor;
        self
    }

    pub fn with_low_volume_per_min(mut self, rate: f64) -> Self {
        self.low_volume_per_min = rate;
        self
    }

    /// Create AdvisorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATUM_ADVISOR_LOW_RESOURCE_PCT`: Scale-down resource bound (default: 30)
    /// - `STRATUM_ADVISOR_RISE_FACTOR`: Rising-volume ratio (default: 1.5)
    /// - `STRATUM_ADVISOR_LOW_VOLUME_PER_MIN`: Low-volume bound (default: 1.0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            low_resource_percent: std::env::var("STRATUM_ADVISOR_LOW_RESOURCE_PCT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.low_resource_percent),
            volume_rise_factor: std::env::var("STRATUM_ADVISOR_RISE_FACTOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.volume_rise_factor),
            low_volume_per_min: std::env::var("STRATUM_ADVISOR_LOW_VOLUME_PER_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.low_volume_per_min),
        }
    }

    /// Validate the configuration, failing fast on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low_resource_percent <= 0.0 || self.low_resource_percent >= 100.0 {
            return Err(ConfigError::InvalidValue {
                field: "advisor.low_resource_percent".to_string(),
                value: self.low_resource_percent.to_string(),
                reason: "must be between 0 and 100".to_string(),
            });
        }
        if self.volume_rise_factor <= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "advisor.volume_rise_factor".to_string(),
                value: self.volume_rise_factor.to_string(),
                reason: "must exceed 1.0 or flat traffic counts as rising".to_string(),
            });
        }
        if self.low_volume_per_min < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "advisor.low_volume_per_min".to_string(),
                value: self.low_volume_per_min.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ADVISOR
// ============================================================================

/// Derives scaling recommendations from the latest snapshots.
///
/// Policy:
/// - **Scale up** when any resource sits in the soft-to-hard degraded
///   band while operation volume is rising, or when a resource has
///   crossed the hard ceiling outright.
/// - **Scale down** when every resource is well under the soft ceiling
///   AND volume has been low across both halves of the volume window.
/// - **Hold** otherwise.
///
/// Confidence normalizes how far the triggering signal sits beyond its
/// threshold into 0-1.
#[derive(Debug, Clone)]
pub struct ScalingAdvisor {
    config: AdvisorConfig,
    /// Degraded-band floor, shared with the health aggregator.
    soft_resource_percent: f32,
    /// Degraded-band ceiling, shared with the health aggregator.
    hard_resource_percent: f32,
}

impl ScalingAdvisor {
    /// Create an advisor. The soft/hard resource percents come from the
    /// health configuration so both components classify the same band.
    pub fn new(
        config: AdvisorConfig,
        soft_resource_percent: f32,
        hard_resource_percent: f32,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.low_resource_percent >= soft_resource_percent {
            return Err(ConfigError::InvalidValue {
                field: "advisor.low_resource_percent".to_string(),
                value: config.low_resource_percent.to_string(),
                reason: format!(
                    "must sit below the soft resource ceiling of {}",
                    soft_resource_percent
                ),
            });
        }
        Ok(Self {
            config,
            soft_resource_percent,
            hard_resource_percent,
        })
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Compute a recommendation from fixed snapshots. Deterministic and
    /// side-effect-free.
    pub fn recommend(
        &self,
        health: &HealthReport,
        volume: &VolumeSignal,
    ) -> ScalingRecommendation {
        let Some(resources) = &health.resources else {
            return ScalingRecommendation::hold(
                0.25,
                "no resource snapshot available yet",
            );
        };

        let labeled = [
            ("CPU", resources.cpu_percent),
            ("memory", resources.memory_percent),
            ("disk", resources.disk_percent),
        ];

        // Pressure: resources at or beyond the soft ceiling, strongest
        // first so the reasons lead with the worst signal.
        let mut pressured: Vec<(&str, f32)> = labeled
            .iter()
            .filter(|(_, value)| *value >= self.soft_resource_percent)
            .copied()
            .collect();
        pressured.sort_by(|a, b| b.1.total_cmp(&a.1));

        let hard_pressure = pressured
            .iter()
            .any(|(_, value)| *value >= self.hard_resource_percent);
        let rising = volume.is_rising(self.config.volume_rise_factor);

        if !pressured.is_empty() && (rising || hard_pressure) {
            let band = (self.hard_resource_percent - self.soft_resource_percent).max(f32::EPSILON);
            let worst = pressured[0].1;
            let norm = ((worst - self.soft_resource_percent) / band).clamp(0.0, 1.0) as f64;

            let mut reasons: Vec<String> = pressured
                .iter()
                .map(|(name, value)| format!("{} at {:.1}% of capacity", name, value))
                .collect();
            if rising {
                reasons.push(format!(
                    "operation volume rising: {:.1}/min vs {:.1}/min",
                    volume.current_per_min, volume.previous_per_min
                ));
            }

            // Memory pressure wants a bigger allocation; everything else
            // wants more workers.
            let suggested = if pressured[0].0 == "memory" {
                "increase_memory_limit"
            } else {
                "increase_workers"
            };

            return ScalingRecommendation {
                direction: ScalingDirection::ScaleUp,
                confidence: 0.5 + 0.5 * norm,
                reasons,
                suggested_action: Some(suggested.to_string()),
            };
        }

        let max_resource = resources.max_percent();
        let volume_low = volume.current_per_min <= self.config.low_volume_per_min
            && volume.previous_per_min <= self.config.low_volume_per_min;

        if max_resource < self.config.low_resource_percent && volume_low {
            let headroom = ((self.config.low_resource_percent - max_resource)
                / self.config.low_resource_percent)
                .clamp(0.0, 1.0) as f64;
            return ScalingRecommendation {
                direction: ScalingDirection::ScaleDown,
                confidence: 0.5 + 0.5 * headroom,
                reasons: vec![
                    format!(
                        "all resources under {:.0}% (peak {:.1}%)",
                        self.config.low_resource_percent, max_resource
                    ),
                    format!(
                        "operation volume low for a sustained window: {:.1}/min",
                        volume.current_per_min
                    ),
                ],
                suggested_action: Some("decrease_workers".to_string()),
            };
        }

        // Confidence in holding grows with distance from the soft ceiling.
        let margin = ((self.soft_resource_percent - max_resource)
            / self.soft_resource_percent)
            .clamp(0.0, 1.0) as f64;
        ScalingRecommendation::hold(
            (0.5 + 0.5 * margin).min(1.0),
            "signals within normal operating range",
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stratum_core::{HealthStatus, OperationCounts, ResourceSnapshot};

    fn advisor() -> ScalingAdvisor {
        ScalingAdvisor::new(AdvisorConfig::default(), 80.0, 95.0).unwrap()
    }

    fn report_with(cpu: f32, memory: f32, disk: f32) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            issues: Vec::new(),
            uptime_seconds: 60,
            uptime_human: "1m 0s".to_string(),
            operations: OperationCounts::default(),
            errors: 0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            max_latency_ms: 0,
            distinct_collections: 0,
            resources: Some(ResourceSnapshot {
                cpu_percent: cpu,
                memory_percent: memory,
                disk_percent: disk,
                sampled_at: Utc::now(),
            }),
            last_error: None,
            generated_at: Utc::now(),
        }
    }

    fn volume(current: f64, previous: f64) -> VolumeSignal {
        VolumeSignal {
            current_per_min: current,
            previous_per_min: previous,
        }
    }

    #[test]
    fn test_scale_up_in_band_with_rising_volume() {
        let rec = advisor().recommend(&report_with(85.0, 40.0, 40.0), &volume(30.0, 10.0));
        assert_eq!(rec.direction, ScalingDirection::ScaleUp);
        assert_eq!(rec.suggested_action.as_deref(), Some("increase_workers"));
        assert!(rec.reasons.iter().any(|r| r.contains("CPU")));
        assert!(rec.reasons.iter().any(|r| r.contains("rising")));
    }

    #[test]
    fn test_in_band_without_rising_volume_holds() {
        let rec = advisor().recommend(&report_with(85.0, 40.0, 40.0), &volume(10.0, 10.0));
        assert_eq!(rec.direction, ScalingDirection::Hold);
    }

    #[test]
    fn test_hard_pressure_scales_up_without_rising_volume() {
        let rec = advisor().recommend(&report_with(96.0, 40.0, 40.0), &volume(5.0, 5.0));
        assert_eq!(rec.direction, ScalingDirection::ScaleUp);
        assert!(rec.confidence >= 0.99);
    }

    #[test]
    fn test_memory_pressure_suggests_memory_limit() {
        let rec = advisor().recommend(&report_with(40.0, 90.0, 40.0), &volume(30.0, 10.0));
        assert_eq!(rec.direction, ScalingDirection::ScaleUp);
        assert_eq!(
            rec.suggested_action.as_deref(),
            Some("increase_memory_limit")
        );
    }

    #[test]
    fn test_scale_down_when_idle_and_cold() {
        let rec = advisor().recommend(&report_with(10.0, 20.0, 15.0), &volume(0.2, 0.5));
        assert_eq!(rec.direction, ScalingDirection::ScaleDown);
        assert_eq!(rec.suggested_action.as_deref(), Some("decrease_workers"));
    }

    #[test]
    fn test_cold_host_with_recent_volume_holds() {
        // Resources idle but traffic only recently dropped: previous
        // half-window was busy, so scale-down is premature.
        let rec = advisor().recommend(&report_with(10.0, 20.0, 15.0), &volume(0.2, 50.0));
        assert_eq!(rec.direction, ScalingDirection::Hold);
    }

    #[test]
    fn test_midrange_resources_hold() {
        let rec = advisor().recommend(&report_with(50.0, 55.0, 45.0), &volume(10.0, 10.0));
        assert_eq!(rec.direction, ScalingDirection::Hold);
        assert!(rec.confidence <= 1.0);
    }

    #[test]
    fn test_no_snapshot_holds_with_low_confidence() {
        let mut report = report_with(0.0, 0.0, 0.0);
        report.resources = None;
        let rec = advisor().recommend(&report, &volume(10.0, 10.0));
        assert_eq!(rec.direction, ScalingDirection::Hold);
        assert_eq!(rec.confidence, 0.25);
        assert!(rec.reasons[0].contains("no resource snapshot"));
    }

    #[test]
    fn test_deterministic_from_fixed_snapshots() {
        let advisor = advisor();
        let report = report_with(85.0, 40.0, 40.0);
        let signal = volume(30.0, 10.0);
        let a = advisor.recommend(&report, &signal);
        let b = advisor.recommend(&report, &signal);
        assert_eq!(a, b);
    }

    #[test]
    fn test_confidence_grows_with_pressure() {
        let advisor = advisor();
        let mild = advisor.recommend(&report_with(81.0, 40.0, 40.0), &volume(30.0, 10.0));
        let severe = advisor.recommend(&report_with(94.0, 40.0, 40.0), &volume(30.0, 10.0));
        assert!(severe.confidence > mild.confidence);
    }

    #[test]
    fn test_config_validate_rejects_rise_factor_at_one() {
        assert!(AdvisorConfig::default()
            .with_volume_rise_factor(1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_new_rejects_low_mark_above_soft_ceiling() {
        let config = AdvisorConfig::default().with_low_resource_percent(85.0);
        assert!(ScalingAdvisor::new(config, 80.0, 95.0).is_err());
    }
}
