//! Health and scaling report types
//!
//! Shared data shapes for health classification and scaling advice so the
//! aggregator, the advisor, and upward callers agree on one vocabulary.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Health classification for the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operational but a soft ceiling has been crossed
    Degraded,
    /// A hard ceiling has been crossed or the backing store is unreachable
    Unhealthy,
}

/// Host resource utilization captured by the resource-sampling job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Global CPU usage percentage (0-100)
    pub cpu_percent: f32,
    /// Used memory percentage (0-100)
    pub memory_percent: f32,
    /// Used disk percentage across mounted disks (0-100)
    pub disk_percent: f32,
    /// When the snapshot was taken
    pub sampled_at: Timestamp,
}

impl ResourceSnapshot {
    /// The highest of the three utilization percentages.
    pub fn max_percent(&self) -> f32 {
        self.cpu_percent
            .max(self.memory_percent)
            .max(self.disk_percent)
    }
}

/// Windowed operation counters, one slot per operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub queries: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl OperationCounts {
    pub fn total(&self) -> u64 {
        self.queries + self.inserts + self.updates + self.deletes
    }
}

/// The most recent recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub at: Timestamp,
}

/// Point-in-time health report.
///
/// Built as one consistent snapshot under the aggregator's lock - no
/// field reflects a later moment than any other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Triggering signals, hardest first. Empty when healthy.
    pub issues: Vec<String>,
    pub uptime_seconds: u64,
    pub uptime_human: String,
    /// Operation counts over the rolling window.
    pub operations: OperationCounts,
    /// Errors over the rolling window.
    pub errors: u64,
    /// Errors divided by total operations over the window (0 when idle).
    pub error_rate: f64,
    /// Mean operation latency over the window, in milliseconds.
    pub avg_latency_ms: f64,
    /// Slowest operation over the window, in milliseconds.
    pub max_latency_ms: u64,
    /// Distinct collections touched since startup.
    pub distinct_collections: usize,
    /// Latest resource snapshot, absent until the first sampling job runs.
    pub resources: Option<ResourceSnapshot>,
    pub last_error: Option<LastError>,
    pub generated_at: Timestamp,
}

/// Format an uptime as a compact human string, e.g. "1d 2h 3m 4s".
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", secs));

    parts.join(" ")
}

// ============================================================================
// SCALING TYPES
// ============================================================================

/// Direction of a scaling recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    ScaleUp,
    ScaleDown,
    Hold,
}

/// A derived scaling recommendation. Recomputed on every request,
/// never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecommendation {
    pub direction: ScalingDirection,
    /// How decisively the signals sit beyond their thresholds (0-1).
    pub confidence: f64,
    /// Triggering signals, strongest first.
    pub reasons: Vec<String>,
    /// Operator hint, e.g. "increase_workers" or "increase_memory_limit".
    pub suggested_action: Option<String>,
}

impl ScalingRecommendation {
    /// A hold recommendation with a single reason.
    pub fn hold(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            direction: ScalingDirection::Hold,
            confidence,
            reasons: vec![reason.into()],
            suggested_action: None,
        }
    }
}

/// Reinforcement-volume signal from the trail tracker: reinforcements
/// per minute over the two halves of its volume window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSignal {
    /// Rate over the most recent half-window.
    pub current_per_min: f64,
    /// Rate over the half-window before that.
    pub previous_per_min: f64,
}

impl VolumeSignal {
    /// Whether the current rate exceeds the previous by the given factor.
    pub fn is_rising(&self, factor: f64) -> bool {
        self.current_per_min > self.previous_per_min * factor
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_seconds_only() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(0), "0s");
    }

    #[test]
    fn test_format_uptime_full() {
        // 1d 2h 3m 4s
        let secs = 86_400 + 2 * 3_600 + 3 * 60 + 4;
        assert_eq!(format_uptime(secs), "1d 2h 3m 4s");
    }

    #[test]
    fn test_format_uptime_skips_zero_leading_units() {
        assert_eq!(format_uptime(3_600 + 5), "1h 5s");
    }

    #[test]
    fn test_operation_counts_total() {
        let counts = OperationCounts {
            queries: 4,
            inserts: 3,
            updates: 2,
            deletes: 1,
        };
        assert_eq!(counts.total(), 10);
    }

    #[test]
    fn test_resource_snapshot_max_percent() {
        let snapshot = ResourceSnapshot {
            cpu_percent: 10.0,
            memory_percent: 85.0,
            disk_percent: 40.0,
            sampled_at: chrono::Utc::now(),
        };
        assert_eq!(snapshot.max_percent(), 85.0);
    }

    #[test]
    fn test_volume_signal_rising() {
        let signal = VolumeSignal {
            current_per_min: 30.0,
            previous_per_min: 10.0,
        };
        assert!(signal.is_rising(1.5));
        assert!(!signal.is_rising(4.0));
    }

    #[test]
    fn test_volume_signal_flat_is_not_rising() {
        let signal = VolumeSignal {
            current_per_min: 10.0,
            previous_per_min: 10.0,
        };
        assert!(!signal.is_rising(1.0));
    }

    #[test]
    fn test_health_status_serde_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }

    #[test]
    fn test_scaling_direction_serde_snake_case() {
        let json = serde_json::to_string(&ScalingDirection::ScaleUp).unwrap();
        assert_eq!(json, "\"scale_up\"");
    }
}
