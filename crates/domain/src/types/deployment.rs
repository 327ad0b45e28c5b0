//! Deployment plans, state machine, and status tracking

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants;
use crate::errors::{CanopyError, Result};

/// One step of a canary plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Traffic percentage routed to the patch during this stage.
    pub percentage: u8,
    /// How long the stage is supervised before advancing.
    pub duration: Duration,
    pub min_success_rate: f64,
    pub max_error_rate: f64,
}

impl Stage {
    /// Stage with the default pass/fail thresholds.
    pub fn new(percentage: u8, duration: Duration) -> Self {
        Self {
            percentage,
            duration,
            min_success_rate: constants::DEFAULT_MIN_SUCCESS_RATE,
            max_error_rate: constants::DEFAULT_MAX_ERROR_RATE,
        }
    }
}

/// Thresholds the rollback machinery watches during a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackThresholds {
    pub min_success_rate: f64,
    pub max_error_rate: f64,
    /// Ceiling on avg latency relative to the baseline (1.0 = unchanged).
    pub max_latency_increase_ratio: f64,
}

impl Default for RollbackThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: constants::DEFAULT_MIN_SUCCESS_RATE,
            max_error_rate: constants::DEFAULT_MAX_ERROR_RATE,
            max_latency_increase_ratio: constants::DEFAULT_LATENCY_INCREASE_RATIO,
        }
    }
}

/// Monitoring cadence for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Rolling window snapshots are computed over.
    pub window: Duration,
    /// How often the stage loop polls the collector.
    pub sample_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window: constants::DEFAULT_MONITORING_WINDOW,
            sample_interval: constants::DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Complete plan for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub rollback: RollbackThresholds,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl DeploymentPlan {
    /// Plan with the given stages and default thresholds/cadence.
    pub fn new(patch_id: Uuid, stages: Vec<Stage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patch_id,
            stages,
            rollback: RollbackThresholds::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Validate structural invariants of the plan.
    ///
    /// Percentages must be strictly increasing and end at most at 100, so
    /// traffic can never decrease while a deployment advances.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(CanopyError::Validation("plan has no stages".to_string()));
        }

        let mut previous = 0u8;
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.percentage == 0 || stage.percentage > 100 {
                return Err(CanopyError::Validation(format!(
                    "stage {idx} percentage {} out of range (1-100)",
                    stage.percentage
                )));
            }
            if stage.percentage <= previous {
                return Err(CanopyError::Validation(format!(
                    "stage {idx} percentage {} does not increase over {previous}",
                    stage.percentage
                )));
            }
            if stage.duration.is_zero() {
                return Err(CanopyError::Validation(format!("stage {idx} duration is zero")));
            }
            if !(0.0..=1.0).contains(&stage.min_success_rate)
                || !(0.0..=1.0).contains(&stage.max_error_rate)
            {
                return Err(CanopyError::Validation(format!(
                    "stage {idx} thresholds out of range"
                )));
            }
            previous = stage.percentage;
        }

        if self.monitoring.sample_interval.is_zero() {
            return Err(CanopyError::Validation("sample interval is zero".to_string()));
        }

        Ok(())
    }
}

/// States of the deployment machine.
///
/// Transitions move strictly forward with a single backward edge into
/// `RollingBack` (from `Deploying` or `Monitoring`); `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Planning,
    Deploying,
    Monitoring,
    Completed,
    RollingBack,
    Failed,
}

impl DeploymentState {
    /// Whether the machine may move from `self` to `next`.
    ///
    /// `RollingBack` is reachable from every pre-terminal state: an
    /// emergency halt can pre-empt a deployment before its first traffic
    /// shift, not just during monitoring.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::Deploying)
                | (Self::Planning, Self::RollingBack)
                | (Self::Deploying, Self::Monitoring)
                | (Self::Deploying, Self::RollingBack)
                | (Self::Monitoring, Self::Completed)
                | (Self::Monitoring, Self::RollingBack)
                | (Self::RollingBack, Self::Failed)
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the deployment is on its way down or already down.
    pub fn is_rolling_back_or_failed(self) -> bool {
        matches!(self, Self::RollingBack | Self::Failed)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Deploying => write!(f, "deploying"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Completed => write!(f, "completed"),
            Self::RollingBack => write!(f, "rolling_back"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kinds of entries in a deployment's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEventKind {
    StateChanged,
    StageStarted,
    StageCompleted,
    HealthCheck,
    RollbackStarted,
    RollbackFinished,
}

/// One entry in a deployment's bounded event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub at: DateTime<Utc>,
    pub kind: DeploymentEventKind,
    pub message: String,
}

/// Mutable status of one deployment.
///
/// Owned by the deployment's handle and mutated under its lock by the stage
/// loop and the rollback machinery. The event log is append-only and
/// capacity-bounded: appending evicts the oldest entry and never blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub id: Uuid,
    pub patch_id: Uuid,
    pub route: String,
    pub state: DeploymentState,
    /// Index of the stage currently (or last) supervised.
    pub current_stage: usize,
    pub traffic_percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<super::metrics::MetricSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<super::metrics::MetricSnapshot>,
    /// Recent health-check snapshots, oldest evicted at capacity.
    pub history: VecDeque<super::metrics::MetricSnapshot>,
    pub events: VecDeque<DeploymentEvent>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentStatus {
    /// Fresh status in `Planning` with zero traffic.
    pub fn new(id: Uuid, patch_id: Uuid, route: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            patch_id,
            route: route.into(),
            state: DeploymentState::Planning,
            current_stage: 0,
            traffic_percentage: 0,
            baseline: None,
            current: None,
            history: VecDeque::with_capacity(16),
            events: VecDeque::with_capacity(16),
            started_at: at,
            updated_at: at,
        }
    }

    /// Record the latest observed snapshot, keeping a bounded trail.
    pub fn observe_snapshot(&mut self, snapshot: super::metrics::MetricSnapshot) {
        if self.history.len() >= constants::METRIC_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.clone());
        self.current = Some(snapshot);
    }

    /// Apply a state transition, enforcing the machine's edges.
    pub fn transition(&mut self, next: DeploymentState, at: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CanopyError::InvalidState(format!(
                "cannot transition {} -> {next}",
                self.state
            )));
        }
        let message = format!("{} -> {next}", self.state);
        self.state = next;
        self.updated_at = at;
        self.record_event(DeploymentEventKind::StateChanged, message, at);
        Ok(())
    }

    /// Append to the bounded event log, evicting the oldest on overflow.
    pub fn record_event(
        &mut self,
        kind: DeploymentEventKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        if self.events.len() >= constants::EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(DeploymentEvent { at, kind, message: message.into() });
        self.updated_at = at;
    }
}
