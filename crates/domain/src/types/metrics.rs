//! Metric samples, snapshots, and health evaluation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Outcome class of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    Error,
}

impl StatusClass {
    /// Classify an HTTP-style status code. Server failures count as errors;
    /// client errors are the caller's problem, not the patch's.
    pub fn from_status(status: u16) -> Self {
        if status >= 500 {
            Self::Error
        } else {
            Self::Success
        }
    }
}

/// One recorded request outcome on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub status: StatusClass,
    pub latency_ms: f64,
    pub route: String,
}

impl MetricSample {
    /// Convenience constructor.
    pub fn new(
        route: impl Into<String>,
        status: StatusClass,
        latency_ms: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { timestamp, status, latency_ms, route: route.into() }
    }
}

/// Derived rolling-window view of a route's samples.
///
/// Never stored; recomputed from the sample buffer on demand. An empty
/// window produces the sentinel from [`MetricSnapshot::empty`] with all
/// rates at 0.0 and `sample_size` 0, never `NaN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub throughput_per_sec: f64,
    pub sample_size: usize,
    pub window_start: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Sentinel snapshot for a window with no samples.
    pub fn empty(window_start: DateTime<Utc>) -> Self {
        Self {
            success_rate: 0.0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            throughput_per_sec: 0.0,
            sample_size: 0,
            window_start,
        }
    }

    /// Whether the window had no samples.
    pub fn is_empty(&self) -> bool {
        self.sample_size == 0
    }

    /// Whether the sample size clears the statistical floor.
    pub fn is_reliable(&self, min_sample_size: usize) -> bool {
        self.sample_size >= min_sample_size
    }
}

/// Relative comparison of a snapshot against the deployment baseline.
///
/// Rate deltas are absolute differences; latency and throughput are ratios
/// (current / baseline), with 1.0 meaning unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub success_rate_delta: f64,
    pub error_rate_delta: f64,
    pub latency_ratio: f64,
    pub throughput_ratio: f64,
}

impl BaselineComparison {
    /// Compare `current` against `baseline`.
    ///
    /// Ratio denominators of zero degrade to 1.0 (unchanged) rather than
    /// producing infinities.
    pub fn between(baseline: &MetricSnapshot, current: &MetricSnapshot) -> Self {
        let ratio = |current: f64, baseline: f64| {
            if baseline > 0.0 {
                current / baseline
            } else {
                1.0
            }
        };

        Self {
            success_rate_delta: current.success_rate - baseline.success_rate,
            error_rate_delta: current.error_rate - baseline.error_rate,
            latency_ratio: ratio(current.avg_latency_ms, baseline.avg_latency_ms),
            throughput_ratio: ratio(current.throughput_per_sec, baseline.throughput_per_sec),
        }
    }
}

/// Thresholds a health check evaluates a snapshot against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub min_success_rate: f64,
    pub max_error_rate: f64,
    /// Absolute latency ceiling; `None` disables the latency check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_avg_latency_ms: Option<f64>,
    /// Sample floor below which rate thresholds are not applied at all.
    pub min_sample_size: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: constants::DEFAULT_MIN_SUCCESS_RATE,
            max_error_rate: constants::DEFAULT_MAX_ERROR_RATE,
            max_avg_latency_ms: None,
            min_sample_size: constants::MIN_SAMPLE_SIZE,
        }
    }
}

/// Result of evaluating a snapshot against thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub sample_size: usize,
}

impl HealthReport {
    /// Evaluate `snapshot` against `thresholds`.
    ///
    /// The sample-size gate comes first: a window below the floor is
    /// healthy-by-default with an explanatory note, so low-traffic routes
    /// cannot fail a check on rate noise alone.
    pub fn evaluate(snapshot: &MetricSnapshot, thresholds: &HealthThresholds) -> Self {
        if !snapshot.is_reliable(thresholds.min_sample_size) {
            return Self {
                healthy: true,
                issues: vec![format!(
                    "insufficient samples for evaluation ({} < {})",
                    snapshot.sample_size, thresholds.min_sample_size
                )],
                sample_size: snapshot.sample_size,
            };
        }

        let mut issues = Vec::new();

        if snapshot.success_rate < thresholds.min_success_rate {
            issues.push(format!(
                "success rate {:.4} below minimum {:.4}",
                snapshot.success_rate, thresholds.min_success_rate
            ));
        }
        if snapshot.error_rate > thresholds.max_error_rate {
            issues.push(format!(
                "error rate {:.4} above maximum {:.4}",
                snapshot.error_rate, thresholds.max_error_rate
            ));
        }
        if let Some(max_latency) = thresholds.max_avg_latency_ms {
            if snapshot.avg_latency_ms > max_latency {
                issues.push(format!(
                    "average latency {:.1}ms above maximum {:.1}ms",
                    snapshot.avg_latency_ms, max_latency
                ));
            }
        }

        Self { healthy: issues.is_empty(), issues, sample_size: snapshot.sample_size }
    }
}
