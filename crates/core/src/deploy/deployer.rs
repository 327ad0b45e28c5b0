//! Canary deployer: staged rollout with supervised advancement
//!
//! `deploy` does the synchronous work a caller can act on — plan
//! validation, slot acquisition, patch attachment — then hands the rest to
//! a spawned supervision task and returns. Everything after that point is
//! an asynchronous outcome, observable through the registry's status
//! snapshots and the deployment's event log.
//!
//! Per stage: raise the split, then poll the collector at the plan's
//! cadence for the stage duration, judging each poll against the stage
//! thresholds (plus a latency ceiling relative to the captured baseline).
//! One unhealthy poll aborts the whole deployment into rollback; a stage
//! that outlives its safety timeout is treated the same way. Stage failures
//! are terminal — there is no per-stage retry.

use std::sync::Arc;
use std::time::Duration;

use canopy_common::resilience::CapacityGate;
use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{
    CanopyError, DeploymentEventKind, DeploymentPlan, DeploymentState, DeploymentStatus,
    EngineConfig, HandlerPatch, HealthReport, HealthThresholds, MetricSnapshot, Result,
    RollbackInitiator, RollbackStrategy, RollbackRecord, Stage,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::deploy::planner;
use crate::deploy::registry::{DeploymentHandle, DeploymentRegistry};
use crate::injection::{HandlerInjector, InjectorStats};
use crate::metrics::MetricsCollector;
use crate::ports::{PatchHandler, TrafficRouter};
use crate::rollback::executor::RollbackExecutor;
use crate::rollback::monitor::RollbackMonitor;

/// Ceiling on any single router call made by the stage loop.
const ROUTER_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// The deployment state machine owner.
pub struct CanaryDeployer<C: Clock = SystemClock> {
    collector: Arc<MetricsCollector<C>>,
    injector: Arc<HandlerInjector<C>>,
    router: Arc<dyn TrafficRouter>,
    registry: Arc<DeploymentRegistry>,
    executor: Arc<RollbackExecutor<C>>,
    monitor: RollbackMonitor<C>,
    gate: CapacityGate,
    stage_safety_buffer: Duration,
    min_sample_size: usize,
    clock: Arc<C>,
}

impl<C: Clock + Clone> CanaryDeployer<C> {
    /// Wire a deployer from its collaborators.
    pub fn with_clock(
        collector: Arc<MetricsCollector<C>>,
        injector: Arc<HandlerInjector<C>>,
        router: Arc<dyn TrafficRouter>,
        registry: Arc<DeploymentRegistry>,
        executor: Arc<RollbackExecutor<C>>,
        config: &EngineConfig,
        clock: C,
    ) -> Self {
        let monitor = RollbackMonitor::with_clock(
            Arc::clone(&collector),
            Arc::clone(&executor),
            config.monitor.clone(),
            config.collector.min_sample_size,
            clock.clone(),
        );
        Self {
            collector,
            injector,
            router,
            registry,
            executor,
            monitor,
            gate: CapacityGate::new(config.deployer.max_concurrent_deployments),
            stage_safety_buffer: config.deployer.stage_safety_buffer,
            min_sample_size: config.collector.min_sample_size,
            clock: Arc::new(clock),
        }
    }

    /// Start a canary deployment for a patch; returns once supervision is
    /// running.
    ///
    /// Synchronous failures are limited to `Validation` (malformed plan or
    /// patch) and `Capacity` (concurrent-deployment cap); every later
    /// failure is an asynchronous outcome on the deployment status.
    #[instrument(skip(self, patch, handler, plan), fields(patch = %patch.name))]
    pub async fn deploy(
        &self,
        patch: HandlerPatch,
        handler: Arc<dyn PatchHandler>,
        plan: Option<DeploymentPlan>,
    ) -> Result<Uuid> {
        let plan = plan.unwrap_or_else(|| planner::default_plan(patch.id));
        plan.validate()?;
        if plan.patch_id != patch.id {
            return Err(CanopyError::InvalidInput(format!(
                "plan targets patch {}, got patch {}",
                plan.patch_id, patch.id
            )));
        }

        let Some(permit) = self.gate.try_acquire() else {
            return Err(CanopyError::Capacity(format!(
                "concurrent deployment limit of {} reached",
                self.gate.capacity()
            )));
        };

        let route = patch.target_route.clone();
        let patch_id = patch.id;

        // Attachment is the validation boundary: a rejected patch means the
        // deployment never existed and no collection side effects happen
        let injection_id = self.injector.attach(patch, handler)?;

        let deployment_id = Uuid::new_v4();
        let status =
            DeploymentStatus::new(deployment_id, patch_id, route.clone(), self.clock.timestamp());
        let handle =
            Arc::new(DeploymentHandle::new(route.clone(), injection_id, plan, status, permit));
        self.registry.insert(Arc::clone(&handle));

        self.collector.start_collection(&route);

        info!(deployment_id = %deployment_id, route = %route, "deployment accepted");

        let worker = StageWorker {
            collector: Arc::clone(&self.collector),
            router: Arc::clone(&self.router),
            executor: Arc::clone(&self.executor),
            handle: Arc::clone(&handle),
            stage_safety_buffer: self.stage_safety_buffer,
            min_sample_size: self.min_sample_size,
            clock: Arc::clone(&self.clock),
        };
        handle.track_task(tokio::spawn(worker.run()));
        handle.track_task(self.monitor.spawn(Arc::clone(&handle)));

        Ok(deployment_id)
    }

    /// Roll one deployment back with the immediate strategy.
    ///
    /// Idempotent: rolling back a deployment that is already rolling back
    /// or failed is a no-op, not an error.
    pub async fn rollback_deployment(
        &self,
        id: Uuid,
        initiator: RollbackInitiator,
        reason: &str,
    ) -> Result<()> {
        self.rollback_deployment_with_strategy(id, initiator, reason, RollbackStrategy::Immediate)
            .await
    }

    /// Roll one deployment back with an explicit strategy.
    pub async fn rollback_deployment_with_strategy(
        &self,
        id: Uuid,
        initiator: RollbackInitiator,
        reason: &str,
        strategy: RollbackStrategy,
    ) -> Result<()> {
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| CanopyError::NotFound(format!("deployment {id}")))?;
        self.executor.rollback(&handle, initiator, reason, strategy).await;
        Ok(())
    }

    /// Halt everything: cancel and roll back every active deployment, then
    /// emergency-stop the injector.
    ///
    /// Safe to call concurrently with ongoing stage processing and with
    /// itself; each deployment's rollback collapses to a single execution.
    /// Returns the number of deployments this call actually rolled back.
    pub async fn emergency_rollback_all(&self, reason: &str) -> usize {
        let handles = self.registry.active().await;
        warn!(count = handles.len(), reason, "emergency rollback of all active deployments");

        // Cancel first so every poll loop observes the halt within one
        // interval, then execute the rollbacks
        for handle in &handles {
            handle.cancel.cancel();
        }

        let mut rolled_back = 0usize;
        for handle in &handles {
            if self
                .executor
                .rollback(handle, RollbackInitiator::Emergency, reason, RollbackStrategy::Immediate)
                .await
            {
                rolled_back += 1;
            }
        }

        self.injector.emergency_stop_all();
        rolled_back
    }

    /// Clone of one deployment's status.
    pub async fn deployment_status(&self, id: Uuid) -> Option<DeploymentStatus> {
        self.registry.status(id).await
    }

    /// Status snapshots of every non-terminal deployment.
    pub async fn list_active(&self) -> Vec<DeploymentStatus> {
        self.registry.active_statuses().await
    }

    /// Most recent rollback records, newest first.
    pub fn rollback_history(&self, limit: usize) -> Vec<RollbackRecord> {
        self.executor.history(limit)
    }

    /// Aggregate injector statistics.
    pub fn injector_stats(&self) -> InjectorStats {
        self.injector.stats()
    }
}

impl<C: Clock> std::fmt::Debug for CanaryDeployer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanaryDeployer")
            .field("max_concurrent", &self.gate.capacity())
            .field("in_flight", &self.gate.in_use())
            .finish()
    }
}

/// Verdict of one stage's supervision.
enum StageVerdict {
    Healthy,
    Unhealthy(String),
    Cancelled,
}

/// Context for the per-deployment supervision task.
struct StageWorker<C: Clock> {
    collector: Arc<MetricsCollector<C>>,
    router: Arc<dyn TrafficRouter>,
    executor: Arc<RollbackExecutor<C>>,
    handle: Arc<DeploymentHandle>,
    stage_safety_buffer: Duration,
    min_sample_size: usize,
    clock: Arc<C>,
}

impl<C: Clock> StageWorker<C> {
    async fn run(self) {
        {
            let mut status = self.handle.status.write().await;
            if status.transition(DeploymentState::Deploying, self.clock.timestamp()).is_err() {
                // Pre-empted before the first traffic shift
                return;
            }
        }

        let stages = self.handle.plan.stages.clone();
        for (index, stage) in stages.iter().enumerate() {
            if self.handle.cancel.is_cancelled() {
                debug!(deployment_id = %self.handle.id, "supervision cancelled between stages");
                return;
            }

            if !self.apply_split(index, stage).await {
                return;
            }

            if index == 0 {
                // Traffic is flowing; monitoring begins and the baseline is
                // captured for the deployment's lifetime
                let mut status = self.handle.status.write().await;
                if status.transition(DeploymentState::Monitoring, self.clock.timestamp()).is_err()
                {
                    return;
                }
                let baseline = self
                    .collector
                    .capture_baseline(&self.handle.route, self.handle.plan.monitoring.window);
                status.baseline = Some(baseline);
            }

            let supervised = tokio::time::timeout(
                stage.duration + self.stage_safety_buffer,
                self.supervise_stage(stage),
            )
            .await;

            match supervised {
                Ok(StageVerdict::Healthy) => {
                    let mut status = self.handle.status.write().await;
                    status.record_event(
                        DeploymentEventKind::StageCompleted,
                        format!("stage {index} healthy at {}%", stage.percentage),
                        self.clock.timestamp(),
                    );
                }
                Ok(StageVerdict::Unhealthy(reason)) => {
                    self.executor
                        .rollback(
                            &self.handle,
                            RollbackInitiator::Automatic,
                            &reason,
                            RollbackStrategy::Immediate,
                        )
                        .await;
                    return;
                }
                Ok(StageVerdict::Cancelled) => {
                    debug!(deployment_id = %self.handle.id, "supervision cancelled mid-stage");
                    return;
                }
                Err(_elapsed) => {
                    // The normal completion condition was never observed;
                    // resolve the stage as failed rather than hang the slot
                    error!(deployment_id = %self.handle.id, stage = index,
                        "stage exceeded its safety timeout");
                    self.executor
                        .rollback(
                            &self.handle,
                            RollbackInitiator::Automatic,
                            &format!("stage {index} monitoring exceeded its safety timeout"),
                            RollbackStrategy::Immediate,
                        )
                        .await;
                    return;
                }
            }
        }

        self.complete().await;
    }

    /// Raise the route split to the stage's percentage.
    async fn apply_split(&self, index: usize, stage: &Stage) -> bool {
        let applied = tokio::time::timeout(
            ROUTER_CALL_TIMEOUT,
            self.router.set_split(&self.handle.route, stage.percentage),
        )
        .await;

        match applied {
            Ok(Ok(())) => {
                let mut status = self.handle.status.write().await;
                status.current_stage = index;
                status.traffic_percentage = stage.percentage;
                status.record_event(
                    DeploymentEventKind::StageStarted,
                    format!("stage {index}: {}% of traffic", stage.percentage),
                    self.clock.timestamp(),
                );
                true
            }
            Ok(Err(error)) => {
                warn!(deployment_id = %self.handle.id, error = %error,
                    "router rejected split; aborting deployment");
                self.executor
                    .rollback(
                        &self.handle,
                        RollbackInitiator::Automatic,
                        &format!("router rejected split for stage {index}: {error}"),
                        RollbackStrategy::Immediate,
                    )
                    .await;
                false
            }
            Err(_) => {
                warn!(deployment_id = %self.handle.id, "router split call timed out");
                self.executor
                    .rollback(
                        &self.handle,
                        RollbackInitiator::Automatic,
                        &format!("router split call timed out for stage {index}"),
                        RollbackStrategy::Immediate,
                    )
                    .await;
                false
            }
        }
    }

    /// Poll the collector for the stage duration; the first unhealthy poll
    /// loses the stage.
    async fn supervise_stage(&self, stage: &Stage) -> StageVerdict {
        let monitoring = &self.handle.plan.monitoring;
        let deadline = self.clock.now() + stage.duration;

        loop {
            tokio::select! {
                _ = self.handle.cancel.cancelled() => {
                    return StageVerdict::Cancelled;
                }
                _ = tokio::time::sleep(monitoring.sample_interval) => {
                    let snapshot =
                        self.collector.snapshot(&self.handle.route, monitoring.window);
                    let thresholds = self.stage_thresholds(stage).await;
                    let report = HealthReport::evaluate(&snapshot, &thresholds);
                    self.record_health(&snapshot, &report).await;

                    if !report.healthy {
                        return StageVerdict::Unhealthy(report.issues.join("; "));
                    }
                    if self.clock.now() >= deadline {
                        return StageVerdict::Healthy;
                    }
                }
            }
        }
    }

    /// Stage thresholds plus a latency ceiling relative to the baseline.
    async fn stage_thresholds(&self, stage: &Stage) -> HealthThresholds {
        let baseline: Option<MetricSnapshot> = {
            let status = self.handle.status.read().await;
            status.baseline.clone()
        };
        let max_avg_latency_ms = baseline
            .filter(|b| b.sample_size > 0 && b.avg_latency_ms > 0.0)
            .map(|b| b.avg_latency_ms * self.handle.plan.rollback.max_latency_increase_ratio);

        HealthThresholds {
            min_success_rate: stage.min_success_rate,
            max_error_rate: stage.max_error_rate,
            max_avg_latency_ms,
            min_sample_size: self.min_sample_size,
        }
    }

    async fn record_health(&self, snapshot: &MetricSnapshot, report: &HealthReport) {
        let mut status = self.handle.status.write().await;
        status.observe_snapshot(snapshot.clone());
        let message = if report.healthy {
            format!(
                "healthy: success {:.4}, error {:.4}, {} samples",
                snapshot.success_rate, snapshot.error_rate, snapshot.sample_size
            )
        } else {
            format!("unhealthy: {}", report.issues.join("; "))
        };
        status.record_event(DeploymentEventKind::HealthCheck, message, self.clock.timestamp());
    }

    /// Final stage held: the rollout is done.
    async fn complete(&self) {
        {
            let mut status = self.handle.status.write().await;
            if status.transition(DeploymentState::Completed, self.clock.timestamp()).is_err() {
                // A rollback beat us to the finish line
                return;
            }
        }
        self.collector.stop_collection(&self.handle.route);
        self.handle.release_slot();
        // Wake the rollback monitor so it exits promptly
        self.handle.cancel.cancel();
        info!(deployment_id = %self.handle.id, route = %self.handle.route,
            "deployment completed at full traffic");
    }
}
