//! Rollback execution
//!
//! The single shared rollback path for every initiator: the stage loop, the
//! rollback monitor, the circuit breaker, emergency halts, and manual
//! requests all land here. The state check-and-set happens once under the
//! deployment's status lock, which is what makes concurrent rollback
//! attempts collapse into exactly one execution and the rest into no-ops.
//!
//! Execution is best-effort: a failing router or injector is logged and the
//! deployment is still driven to `Failed`. A rollback must never hang the
//! system it is trying to save.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::constants::ROLLBACK_HISTORY_CAPACITY;
use canopy_domain::{
    CanopyError, DeploymentEventKind, DeploymentState, RollbackInitiator, RollbackRecord,
    RollbackStrategy,
};
use tracing::{debug, info, warn};

use crate::deploy::registry::DeploymentHandle;
use crate::injection::HandlerInjector;
use crate::ports::TrafficRouter;

/// Ceiling on any single router call made during rollback.
const ROUTER_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between steps of a gradual reduction.
const GRADUAL_STEP_DELAY: Duration = Duration::from_millis(200);

/// Executes rollbacks and keeps the bounded audit history.
pub struct RollbackExecutor<C: Clock = SystemClock> {
    router: Arc<dyn TrafficRouter>,
    injector: Arc<HandlerInjector<C>>,
    history: Mutex<VecDeque<RollbackRecord>>,
    clock: Arc<C>,
}

impl<C: Clock> RollbackExecutor<C> {
    /// Executor with a custom clock.
    pub fn with_clock(
        router: Arc<dyn TrafficRouter>,
        injector: Arc<HandlerInjector<C>>,
        clock: C,
    ) -> Self {
        Self {
            router,
            injector,
            history: Mutex::new(VecDeque::with_capacity(ROLLBACK_HISTORY_CAPACITY)),
            clock: Arc::new(clock),
        }
    }

    /// Roll a deployment back. Returns `true` when this call performed the
    /// rollback, `false` when it was a no-op.
    ///
    /// Idempotent: a deployment already rolling back, failed, or completed
    /// is left alone. Holds the status lock only for the check-and-set and
    /// the finalization; router calls happen lock-free, so this can never
    /// deadlock against the stage loop or a concurrent emergency halt.
    pub async fn rollback(
        &self,
        handle: &DeploymentHandle,
        initiator: RollbackInitiator,
        reason: &str,
        strategy: RollbackStrategy,
    ) -> bool {
        let started_at = self.clock.timestamp();

        // Single decision point: first caller through wins
        let from_percentage = {
            let mut status = handle.status.write().await;
            if status.state.is_rolling_back_or_failed() || status.state.is_terminal() {
                debug!(deployment_id = %handle.id, state = %status.state,
                    "rollback requested on settled deployment; no-op");
                return false;
            }
            let from = status.traffic_percentage;
            if let Err(error) = status.transition(DeploymentState::RollingBack, started_at) {
                warn!(deployment_id = %handle.id, error = %error,
                    "rollback could not transition state");
                return false;
            }
            status.record_event(
                DeploymentEventKind::RollbackStarted,
                format!("{initiator}: {reason}"),
                started_at,
            );
            from
        };

        info!(deployment_id = %handle.id, %initiator, reason,
            from_percentage, "rolling back deployment");

        // Wake the stage loop and monitor out of their poll cycles
        handle.cancel.cancel();

        let traffic_ok = self.withdraw_traffic(&handle.route, from_percentage, strategy).await;
        let detach_ok = self.detach_injection(handle);
        let success = traffic_ok && detach_ok;

        let finished_at = self.clock.timestamp();
        {
            let mut status = handle.status.write().await;
            status.traffic_percentage = 0;
            if let Err(error) = status.transition(DeploymentState::Failed, finished_at) {
                warn!(deployment_id = %handle.id, error = %error,
                    "rollback finalization could not mark deployment failed");
            }
            status.record_event(
                DeploymentEventKind::RollbackFinished,
                if success {
                    "traffic withdrawn, patch disabled".to_string()
                } else {
                    "completed with errors; see log".to_string()
                },
                finished_at,
            );
        }
        handle.release_slot();

        self.push_record(RollbackRecord {
            deployment_id: handle.id,
            initiator,
            reason: reason.to_string(),
            strategy,
            started_at,
            finished_at,
            success,
        });

        if !success {
            warn!(deployment_id = %handle.id,
                "rollback finished with errors; deployment marked failed anyway");
        }
        true
    }

    /// Most recent rollback records, newest first.
    pub fn history(&self, limit: usize) -> Vec<RollbackRecord> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Withdraw traffic per the strategy. Gradual degrades to immediate when
    /// the router cannot step traffic safely.
    async fn withdraw_traffic(
        &self,
        route: &str,
        from_percentage: u8,
        strategy: RollbackStrategy,
    ) -> bool {
        let effective = match strategy {
            RollbackStrategy::Gradual { .. } if !self.router.supports_gradual() => {
                debug!(route, "router lacks gradual support; degrading to immediate");
                RollbackStrategy::Immediate
            }
            other => other,
        };

        if let RollbackStrategy::Gradual { steps } = effective {
            let steps = steps.max(1);
            let decrement = (from_percentage / steps).max(1);
            let mut percentage = from_percentage;
            while percentage > decrement {
                percentage -= decrement;
                if !self.set_split(route, percentage).await {
                    // A failing step ends the descent; fall through to the
                    // final clear, which is what actually protects traffic
                    break;
                }
                tokio::time::sleep(GRADUAL_STEP_DELAY).await;
            }
        }

        self.clear_split(route).await
    }

    async fn set_split(&self, route: &str, percentage: u8) -> bool {
        match tokio::time::timeout(ROUTER_CALL_TIMEOUT, self.router.set_split(route, percentage))
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(route, percentage, error = %error, "router rejected split reduction");
                false
            }
            Err(_) => {
                warn!(route, percentage, "router split reduction timed out");
                false
            }
        }
    }

    async fn clear_split(&self, route: &str) -> bool {
        match tokio::time::timeout(ROUTER_CALL_TIMEOUT, self.router.clear_split(route)).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(route, error = %error, "router failed to clear split");
                false
            }
            Err(_) => {
                warn!(route, "router clear-split timed out");
                false
            }
        }
    }

    fn detach_injection(&self, handle: &DeploymentHandle) -> bool {
        match self.injector.detach(handle.injection_id) {
            Ok(()) => true,
            // Already gone (emergency stop, prior detach): nothing to undo
            Err(CanopyError::NotFound(_)) => true,
            Err(error) => {
                warn!(deployment_id = %handle.id, error = %error,
                    "failed to detach injection during rollback");
                false
            }
        }
    }

    fn push_record(&self, record: RollbackRecord) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() >= ROLLBACK_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);
    }
}

impl RollbackExecutor<SystemClock> {
    /// Executor on the system clock.
    pub fn new(router: Arc<dyn TrafficRouter>, injector: Arc<HandlerInjector<SystemClock>>) -> Self {
        Self::with_clock(router, injector, SystemClock)
    }
}

impl<C: Clock> std::fmt::Debug for RollbackExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackExecutor").finish()
    }
}
