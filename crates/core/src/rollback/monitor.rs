//! Independent per-deployment rollback supervision
//!
//! Each active deployment gets its own monitor task, polling live metrics
//! on a cadence independent of (and typically shorter than) the stage
//! loop's. When a trigger fires, the monitor pre-empts the deployer through
//! the shared rollback path; the loser of that race no-ops. The task exits
//! within one poll interval of the deployment's token being cancelled.

use std::sync::Arc;

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{MonitorConfig, RollbackInitiator, RollbackStrategy};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::deploy::registry::DeploymentHandle;
use crate::metrics::MetricsCollector;
use crate::rollback::executor::RollbackExecutor;
use crate::rollback::triggers::{triggers_for, TriggerDecision, TriggerEvaluator};

/// Spawns and parameterizes per-deployment supervision loops.
pub struct RollbackMonitor<C: Clock = SystemClock> {
    collector: Arc<MetricsCollector<C>>,
    executor: Arc<RollbackExecutor<C>>,
    config: MonitorConfig,
    min_sample_size: usize,
    clock: C,
}

impl<C: Clock + Clone> RollbackMonitor<C> {
    /// Monitor factory with a custom clock.
    pub fn with_clock(
        collector: Arc<MetricsCollector<C>>,
        executor: Arc<RollbackExecutor<C>>,
        config: MonitorConfig,
        min_sample_size: usize,
        clock: C,
    ) -> Self {
        Self { collector, executor, config, min_sample_size, clock }
    }

    /// Spawn the supervision loop for one deployment.
    pub fn spawn(&self, handle: Arc<DeploymentHandle>) -> JoinHandle<()> {
        let collector = Arc::clone(&self.collector);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let evaluator =
            TriggerEvaluator::with_clock(&config, self.min_sample_size, self.clock.clone());

        tokio::spawn(async move {
            debug!(deployment_id = %handle.id, route = %handle.route,
                "rollback monitor started");
            let window = handle.plan.monitoring.window;
            loop {
                tokio::select! {
                    _ = handle.cancel.cancelled() => {
                        debug!(deployment_id = %handle.id, "rollback monitor cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(config.poll_interval) => {
                        let snapshot = collector.snapshot(&handle.route, window);
                        let baseline = collector.baseline(&handle.route);
                        let triggers = triggers_for(&handle.plan.rollback, baseline.as_ref());

                        if let TriggerDecision::Rollback { reason, violations } =
                            evaluator.evaluate(&triggers, &snapshot)
                        {
                            info!(deployment_id = %handle.id, reason,
                                violation_count = violations.len(),
                                "rollback monitor pre-empting deployment");
                            executor
                                .rollback(
                                    &handle,
                                    RollbackInitiator::Automatic,
                                    &reason,
                                    RollbackStrategy::Immediate,
                                )
                                .await;
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl RollbackMonitor<SystemClock> {
    /// Monitor factory on the system clock.
    pub fn new(
        collector: Arc<MetricsCollector<SystemClock>>,
        executor: Arc<RollbackExecutor<SystemClock>>,
        config: MonitorConfig,
        min_sample_size: usize,
    ) -> Self {
        Self::with_clock(collector, executor, config, min_sample_size, SystemClock)
    }
}

impl<C: Clock> std::fmt::Debug for RollbackMonitor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackMonitor")
            .field("poll_interval", &self.config.poll_interval)
            .finish()
    }
}
