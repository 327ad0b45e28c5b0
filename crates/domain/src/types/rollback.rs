//! Rollback triggers, strategies, and audit records

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants;

/// Metric a rollback trigger watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMetric {
    ErrorRate,
    SuccessRate,
    LatencyMs,
}

impl fmt::Display for TriggerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorRate => write!(f, "error_rate"),
            Self::SuccessRate => write!(f, "success_rate"),
            Self::LatencyMs => write!(f, "latency_ms"),
        }
    }
}

/// One configured rollback trigger.
///
/// `ErrorRate` and `LatencyMs` violate *above* the threshold; `SuccessRate`
/// violates *below* it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTrigger {
    pub metric: TriggerMetric,
    pub threshold: f64,
    /// Trailing window for sustained-violation counting.
    pub sustained_for: Duration,
}

impl RollbackTrigger {
    /// Trigger with the default sustained window.
    pub fn new(metric: TriggerMetric, threshold: f64) -> Self {
        Self { metric, threshold, sustained_for: constants::SUSTAINED_VIOLATION_WINDOW }
    }

    /// Whether `observed` violates this trigger.
    pub fn is_violated_by(&self, observed: f64) -> bool {
        match self.metric {
            TriggerMetric::ErrorRate | TriggerMetric::LatencyMs => observed > self.threshold,
            TriggerMetric::SuccessRate => observed < self.threshold,
        }
    }
}

/// A recorded threshold violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerViolation {
    pub metric: TriggerMetric,
    pub observed: f64,
    pub at: DateTime<Utc>,
}

/// How traffic is withdrawn from a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    /// Zero traffic to the patch at once.
    Immediate,
    /// Stepped reduction; degrades to `Immediate` when the router cannot
    /// step traffic safely.
    Gradual { steps: u8 },
}

impl Default for RollbackStrategy {
    fn default() -> Self {
        Self::Immediate
    }
}

/// Who or what initiated a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackInitiator {
    Manual,
    Automatic,
    CircuitBreaker,
    Emergency,
}

impl fmt::Display for RollbackInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
            Self::CircuitBreaker => write!(f, "circuit_breaker"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// Immutable audit entry produced for every rollback attempt.
///
/// Written whether or not execution succeeded; a failed rollback is still a
/// rollback the operator needs to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub deployment_id: Uuid,
    pub initiator: RollbackInitiator,
    pub reason: String,
    pub strategy: RollbackStrategy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
}
