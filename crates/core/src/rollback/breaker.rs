//! Standing route circuit breaker
//!
//! The last line of defense, independent of any single deployment's
//! monitors: a background loop watches every collecting route, and an error
//! rate above the threshold (with enough samples to mean something) trips
//! the breaker — emergency rollback of *all* active deployments and an
//! emergency stop of the injector. The breaker stays open until an operator
//! resets it; automatic half-open probing makes no sense when the recovery
//! action was "disable every patch".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{BreakerConfig, CanopyError, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::deployer::CanaryDeployer;
use crate::metrics::MetricsCollector;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Watching; patches may serve traffic.
    Closed,
    /// Tripped; every patch has been halted. Reset is manual.
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// Metrics snapshot for observability consumers.
#[derive(Debug, Clone)]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub trip_count: u64,
    pub last_trip_reason: Option<String>,
}

/// Deployment-independent emergency monitor over route health.
pub struct RouteCircuitBreaker<C: Clock = SystemClock> {
    collector: Arc<MetricsCollector<C>>,
    deployer: Arc<CanaryDeployer<C>>,
    config: BreakerConfig,
    state: RwLock<BreakerState>,
    trip_count: AtomicU64,
    last_trip_reason: RwLock<Option<String>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock + Clone> RouteCircuitBreaker<C> {
    /// Breaker wired to its collaborators; call [`Self::start`] to begin
    /// watching.
    pub fn new(
        collector: Arc<MetricsCollector<C>>,
        deployer: Arc<CanaryDeployer<C>>,
        config: BreakerConfig,
    ) -> Self {
        Self {
            collector,
            deployer,
            config,
            state: RwLock::new(BreakerState::Closed),
            trip_count: AtomicU64::new(0),
            last_trip_reason: RwLock::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start the watch loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the breaker is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Err(CanopyError::InvalidState("circuit breaker already running".to_string()));
        }

        let breaker = Arc::clone(self);
        let cancel = self.cancel.clone();
        let poll_interval = self.config.poll_interval;
        *task = Some(tokio::spawn(async move {
            info!("route circuit breaker watching");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("circuit breaker loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        breaker.scan_routes().await;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Stop the watch loop gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop does not wind down within the join
    /// timeout.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let task = {
            let mut guard = match self.task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(task) = task {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .map_err(|_| {
                    CanopyError::Internal("circuit breaker task did not stop in time".to_string())
                })?
                .map_err(|e| CanopyError::Internal(format!("circuit breaker task panicked: {e}")))?;
        }
        Ok(())
    }

    /// One pass over every collecting route.
    async fn scan_routes(&self) {
        if self.state() == BreakerState::Open {
            return;
        }

        for route in self.collector.routes() {
            let snapshot = self.collector.snapshot(&route, self.config.window);
            if snapshot.sample_size >= self.config.min_samples
                && snapshot.error_rate > self.config.error_rate_threshold
            {
                let reason = format!(
                    "route {route}: error rate {:.4} above {:.2} over {} samples",
                    snapshot.error_rate, self.config.error_rate_threshold, snapshot.sample_size
                );
                self.trip(&reason).await;
                return;
            }
        }
    }

    /// Trip the breaker, halting every deployment and patch.
    ///
    /// Reachable manually as well as from the watch loop, so the emergency
    /// path exists even when per-deployment monitors are gone. Idempotent:
    /// only the Closed→Open edge executes the halt.
    pub async fn trip(&self, reason: &str) {
        {
            let mut state = match self.state.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == BreakerState::Open {
                debug!("breaker already open; trip is a no-op");
                return;
            }
            *state = BreakerState::Open;
        }
        self.trip_count.fetch_add(1, Ordering::Relaxed);
        {
            let mut last = match self.last_trip_reason.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = Some(reason.to_string());
        }

        warn!(reason, "circuit breaker tripped; halting all deployments");
        let rolled_back = self.deployer.emergency_rollback_all(reason).await;
        warn!(rolled_back, "circuit breaker emergency rollback finished");
    }

    /// Close the breaker again after operator intervention.
    pub fn reset(&self) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == BreakerState::Open {
            info!("circuit breaker manually reset to closed");
        }
        *state = BreakerState::Closed;
    }

    /// Current breaker state.
    pub fn state(&self) -> BreakerState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> BreakerMetrics {
        let last_trip_reason = match self.last_trip_reason.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        BreakerMetrics {
            state: self.state(),
            trip_count: self.trip_count.load(Ordering::Acquire),
            last_trip_reason,
        }
    }
}

impl<C: Clock> fmt::Debug for RouteCircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        f.debug_struct("RouteCircuitBreaker")
            .field("state", &state)
            .field("trip_count", &self.trip_count.load(Ordering::Acquire))
            .finish()
    }
}
