//! Engine wiring
//!
//! [`CanopyEngine`] assembles the collector, injector, registry, rollback
//! machinery, deployer, and circuit breaker from one validated
//! [`EngineConfig`] and the host's router. Hosts and tests get a single
//! construction point instead of hand-wiring six components in the right
//! order.

use std::sync::Arc;

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{EngineConfig, Result};
use tracing::info;

use crate::deploy::{CanaryDeployer, DeploymentRegistry};
use crate::injection::HandlerInjector;
use crate::metrics::MetricsCollector;
use crate::ports::TrafficRouter;
use crate::rollback::{RollbackExecutor, RouteCircuitBreaker};

/// Fully wired rollout engine.
pub struct CanopyEngine<C: Clock = SystemClock> {
    collector: Arc<MetricsCollector<C>>,
    injector: Arc<HandlerInjector<C>>,
    registry: Arc<DeploymentRegistry>,
    deployer: Arc<CanaryDeployer<C>>,
    breaker: Arc<RouteCircuitBreaker<C>>,
}

impl CanopyEngine<SystemClock> {
    /// Engine on the system clock.
    pub fn new(config: EngineConfig, router: Arc<dyn TrafficRouter>) -> Result<Self> {
        Self::with_clock(config, router, SystemClock)
    }
}

impl<C: Clock + Clone> CanopyEngine<C> {
    /// Engine with a custom clock shared by every component.
    pub fn with_clock(
        config: EngineConfig,
        router: Arc<dyn TrafficRouter>,
        clock: C,
    ) -> Result<Self> {
        config.validate()?;

        let collector =
            Arc::new(MetricsCollector::with_clock(config.collector.clone(), clock.clone()));
        let injector =
            Arc::new(HandlerInjector::with_clock(config.injector.clone(), clock.clone()));
        let registry = Arc::new(DeploymentRegistry::new());
        let executor = Arc::new(RollbackExecutor::with_clock(
            Arc::clone(&router),
            Arc::clone(&injector),
            clock.clone(),
        ));
        let deployer = Arc::new(CanaryDeployer::with_clock(
            Arc::clone(&collector),
            Arc::clone(&injector),
            router,
            Arc::clone(&registry),
            executor,
            &config,
            clock,
        ));
        let breaker = Arc::new(RouteCircuitBreaker::new(
            Arc::clone(&collector),
            Arc::clone(&deployer),
            config.breaker.clone(),
        ));

        Ok(Self { collector, injector, registry, deployer, breaker })
    }

    /// Start the standing monitors (currently the circuit breaker).
    pub fn start(&self) -> Result<()> {
        self.breaker.start()
    }

    /// Wind the engine down: stop the breaker and cancel supervision of any
    /// still-active deployment.
    ///
    /// Deployments are left in their current state; shutdown is for process
    /// exit, not for rolling anything back.
    pub async fn shutdown(&self) -> Result<()> {
        self.breaker.stop().await?;
        for handle in self.registry.active().await {
            handle.cancel.cancel();
            handle.await_tasks().await;
        }
        info!("engine shut down");
        Ok(())
    }

    /// The metrics collector (also the host's sample-ingestion target).
    pub fn collector(&self) -> &Arc<MetricsCollector<C>> {
        &self.collector
    }

    /// The handler injector.
    pub fn injector(&self) -> &Arc<HandlerInjector<C>> {
        &self.injector
    }

    /// The deployment registry (read-only snapshot accessors).
    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    /// The canary deployer.
    pub fn deployer(&self) -> &Arc<CanaryDeployer<C>> {
        &self.deployer
    }

    /// The standing circuit breaker.
    pub fn breaker(&self) -> &Arc<RouteCircuitBreaker<C>> {
        &self.breaker
    }
}

impl<C: Clock> std::fmt::Debug for CanopyEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanopyEngine").finish()
    }
}
