//! Rollback trigger evaluation
//!
//! Two rules separate noise from regression:
//! - **Critical path**: a single observation of error rate above 0.5 or
//!   success rate below 0.5 trips immediately, history be damned.
//! - **Sustained violation**: the same metric violating its threshold in at
//!   least three polls within the trailing window also trips, even when no
//!   single observation was critical.
//!
//! Windows below the sample-size floor are held, not judged; low-traffic
//! routes must not roll back on rate noise.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{
    MetricSnapshot, MonitorConfig, RollbackThresholds, RollbackTrigger, TriggerMetric,
    TriggerViolation,
};
use tracing::{debug, warn};

/// Outcome of one evaluation pass.
#[derive(Debug, Clone)]
pub enum TriggerDecision {
    /// Nothing actionable observed.
    Hold,
    /// Roll the deployment back.
    Rollback { reason: String, violations: Vec<TriggerViolation> },
}

impl TriggerDecision {
    /// Whether this decision demands a rollback.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

/// Build the trigger list for a deployment from its plan thresholds.
///
/// The latency trigger is relative to the baseline and only exists once a
/// usable baseline was captured.
pub fn triggers_for(
    thresholds: &RollbackThresholds,
    baseline: Option<&MetricSnapshot>,
) -> Vec<RollbackTrigger> {
    let mut triggers = vec![
        RollbackTrigger::new(TriggerMetric::ErrorRate, thresholds.max_error_rate),
        RollbackTrigger::new(TriggerMetric::SuccessRate, thresholds.min_success_rate),
    ];
    if let Some(baseline) = baseline {
        if baseline.sample_size > 0 && baseline.avg_latency_ms > 0.0 {
            triggers.push(RollbackTrigger::new(
                TriggerMetric::LatencyMs,
                baseline.avg_latency_ms * thresholds.max_latency_increase_ratio,
            ));
        }
    }
    triggers
}

/// Stateful evaluator tracking violations across polls.
///
/// One evaluator per supervised deployment; the violation history is what
/// makes the sustained rule possible.
pub struct TriggerEvaluator<C: Clock = SystemClock> {
    critical_error_rate: f64,
    critical_success_rate: f64,
    sustained_violations: usize,
    min_sample_size: usize,
    history: Mutex<Vec<(Instant, TriggerViolation)>>,
    clock: Arc<C>,
}

impl TriggerEvaluator<SystemClock> {
    /// Evaluator on the system clock.
    pub fn new(config: &MonitorConfig, min_sample_size: usize) -> Self {
        Self::with_clock(config, min_sample_size, SystemClock)
    }
}

impl<C: Clock> TriggerEvaluator<C> {
    /// Evaluator with a custom clock.
    pub fn with_clock(config: &MonitorConfig, min_sample_size: usize, clock: C) -> Self {
        Self {
            critical_error_rate: config.critical_error_rate,
            critical_success_rate: config.critical_success_rate,
            sustained_violations: config.sustained_violations,
            min_sample_size,
            history: Mutex::new(Vec::new()),
            clock: Arc::new(clock),
        }
    }

    /// Evaluate one snapshot against the trigger list.
    pub fn evaluate(
        &self,
        triggers: &[RollbackTrigger],
        snapshot: &MetricSnapshot,
    ) -> TriggerDecision {
        if snapshot.sample_size < self.min_sample_size {
            debug!(
                sample_size = snapshot.sample_size,
                floor = self.min_sample_size,
                "holding: window below sample floor"
            );
            return TriggerDecision::Hold;
        }

        let at = self.clock.timestamp();

        // Critical path: one bad enough observation is enough
        if snapshot.error_rate > self.critical_error_rate {
            let violation = TriggerViolation {
                metric: TriggerMetric::ErrorRate,
                observed: snapshot.error_rate,
                at,
            };
            warn!(error_rate = snapshot.error_rate, "critical error rate observed");
            return TriggerDecision::Rollback {
                reason: format!(
                    "critical error rate {:.4} above {:.2}",
                    snapshot.error_rate, self.critical_error_rate
                ),
                violations: vec![violation],
            };
        }
        if snapshot.success_rate < self.critical_success_rate {
            let violation = TriggerViolation {
                metric: TriggerMetric::SuccessRate,
                observed: snapshot.success_rate,
                at,
            };
            warn!(success_rate = snapshot.success_rate, "critical success rate observed");
            return TriggerDecision::Rollback {
                reason: format!(
                    "critical success rate {:.4} below {:.2}",
                    snapshot.success_rate, self.critical_success_rate
                ),
                violations: vec![violation],
            };
        }

        // Sustained rule: record this poll's violations, then count per
        // metric over each trigger's trailing window
        let now = self.clock.now();
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for trigger in triggers {
            let observed = Self::observed_value(trigger.metric, snapshot);
            if trigger.is_violated_by(observed) {
                history.push((
                    now,
                    TriggerViolation { metric: trigger.metric, observed, at },
                ));
            }
        }

        // Prune entries no window can still see
        if let Some(max_window) = triggers.iter().map(|t| t.sustained_for).max() {
            history.retain(|(recorded, _)| now.saturating_duration_since(*recorded) <= max_window);
        }

        for trigger in triggers {
            let violations: Vec<TriggerViolation> = history
                .iter()
                .filter(|(recorded, violation)| {
                    violation.metric == trigger.metric
                        && now.saturating_duration_since(*recorded) <= trigger.sustained_for
                })
                .map(|(_, violation)| violation.clone())
                .collect();

            if violations.len() >= self.sustained_violations {
                warn!(
                    metric = %trigger.metric,
                    count = violations.len(),
                    "sustained threshold violation"
                );
                return TriggerDecision::Rollback {
                    reason: format!(
                        "{} violated threshold {:.4} in {} of the last polls within {:?}",
                        trigger.metric,
                        trigger.threshold,
                        violations.len(),
                        trigger.sustained_for
                    ),
                    violations,
                };
            }
        }

        TriggerDecision::Hold
    }

    fn observed_value(metric: TriggerMetric, snapshot: &MetricSnapshot) -> f64 {
        match metric {
            TriggerMetric::ErrorRate => snapshot.error_rate,
            TriggerMetric::SuccessRate => snapshot.success_rate,
            TriggerMetric::LatencyMs => snapshot.avg_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use canopy_common::time::MockClock;
    use chrono::Utc;

    use super::*;

    fn snapshot(success: f64, error: f64, latency: f64, size: usize) -> MetricSnapshot {
        MetricSnapshot {
            success_rate: success,
            error_rate: error,
            avg_latency_ms: latency,
            throughput_per_sec: 1.0,
            sample_size: size,
            window_start: Utc::now(),
        }
    }

    fn evaluator(clock: MockClock) -> TriggerEvaluator<MockClock> {
        TriggerEvaluator::with_clock(&MonitorConfig::default(), 10, clock)
    }

    fn default_triggers() -> Vec<RollbackTrigger> {
        triggers_for(&RollbackThresholds::default(), None)
    }

    /// Validates a single 0.6 error-rate observation trips immediately, with
    /// no three-poll wait.
    #[test]
    fn test_critical_error_rate_trips_immediately() {
        let evaluator = evaluator(MockClock::new());
        let decision = evaluator.evaluate(&default_triggers(), &snapshot(0.4, 0.6, 50.0, 100));

        match decision {
            TriggerDecision::Rollback { reason, violations } => {
                assert!(reason.contains("critical error rate"));
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].metric, TriggerMetric::ErrorRate);
            }
            TriggerDecision::Hold => panic!("expected immediate rollback"),
        }
    }

    /// Validates a critical success-rate floor also trips on one observation.
    #[test]
    fn test_critical_success_rate_trips_immediately() {
        let evaluator = evaluator(MockClock::new());
        let decision = evaluator.evaluate(&default_triggers(), &snapshot(0.45, 0.3, 50.0, 100));
        assert!(decision.is_rollback());
    }

    /// Validates the sustained rule: three violations of the same metric
    /// within the window trip, two do not.
    #[test]
    fn test_sustained_violations_trip_on_third_poll() {
        let clock = MockClock::new();
        let evaluator = evaluator(clock.clone());
        let triggers = default_triggers();

        // Error rate 0.30: violates the 0.05 threshold but is not critical
        let degraded = snapshot(0.70, 0.30, 50.0, 100);

        assert!(!evaluator.evaluate(&triggers, &degraded).is_rollback());
        clock.advance(Duration::from_secs(5));
        assert!(!evaluator.evaluate(&triggers, &degraded).is_rollback());
        clock.advance(Duration::from_secs(5));

        let decision = evaluator.evaluate(&triggers, &degraded);
        match decision {
            TriggerDecision::Rollback { reason, violations } => {
                assert!(reason.contains("error_rate"));
                assert_eq!(violations.len(), 3);
            }
            TriggerDecision::Hold => panic!("expected rollback on third sustained violation"),
        }
    }

    /// Validates violations age out of the trailing window.
    #[test]
    fn test_sustained_window_expiry() {
        let clock = MockClock::new();
        let evaluator = evaluator(clock.clone());
        let triggers = default_triggers();
        let degraded = snapshot(0.70, 0.30, 50.0, 100);

        assert!(!evaluator.evaluate(&triggers, &degraded).is_rollback());
        clock.advance(Duration::from_secs(5));
        assert!(!evaluator.evaluate(&triggers, &degraded).is_rollback());

        // The first two violations fall out of the 60s window
        clock.advance(Duration::from_secs(90));
        assert!(!evaluator.evaluate(&triggers, &degraded).is_rollback());
    }

    /// Validates windows below the sample floor are held, even with awful
    /// rates.
    #[test]
    fn test_sample_floor_holds() {
        let evaluator = evaluator(MockClock::new());
        let decision = evaluator.evaluate(&default_triggers(), &snapshot(0.0, 1.0, 50.0, 3));
        assert!(!decision.is_rollback());
    }

    /// Validates healthy snapshots never accumulate violations.
    #[test]
    fn test_healthy_snapshots_hold() {
        let clock = MockClock::new();
        let evaluator = evaluator(clock.clone());
        let triggers = default_triggers();

        for _ in 0..10 {
            assert!(!evaluator.evaluate(&triggers, &snapshot(0.99, 0.01, 50.0, 100)).is_rollback());
            clock.advance(Duration::from_secs(5));
        }
    }

    /// Validates the latency trigger only exists with a usable baseline and
    /// fires relative to it.
    #[test]
    fn test_latency_trigger_relative_to_baseline() {
        let clock = MockClock::new();
        let evaluator = evaluator(clock.clone());

        let baseline = snapshot(0.99, 0.01, 100.0, 100);
        let triggers = triggers_for(&RollbackThresholds::default(), Some(&baseline));
        assert_eq!(triggers.len(), 3);

        // 2x default ratio on a 100ms baseline: threshold 200ms
        let slow = snapshot(0.99, 0.01, 350.0, 100);
        assert!(!evaluator.evaluate(&triggers, &slow).is_rollback());
        clock.advance(Duration::from_secs(5));
        assert!(!evaluator.evaluate(&triggers, &slow).is_rollback());
        clock.advance(Duration::from_secs(5));
        assert!(evaluator.evaluate(&triggers, &slow).is_rollback());

        // No latency trigger without a baseline
        assert_eq!(default_triggers().len(), 2);
    }
}
