//! Per-request glue between the host pipeline and the engine
//!
//! The host calls [`PipelineHook::handle`] for every request on a route the
//! engine may be watching. The hook selects the lane, runs the wrapped
//! patch (canary lane, matching conditions) or the continuation, times the
//! whole request, and feeds the metrics collector — for every request,
//! whether or not the patch was invoked. Stable-lane traffic is exactly
//! what gives the rollout its comparison population.

use std::sync::Arc;

use canopy_common::time::{Clock, SystemClock};
use canopy_core::injection::HandlerInjector;
use canopy_core::metrics::MetricsCollector;
use canopy_core::ports::Continuation;
use canopy_domain::{MetricSample, PatchRequest, PatchResponse, StatusClass};
use tracing::debug;

use crate::router::{Lane, SplitRouter};

/// Request-lifecycle hook the host wires into its pipeline.
pub struct PipelineHook<C: Clock = SystemClock> {
    router: Arc<SplitRouter>,
    injector: Arc<HandlerInjector<C>>,
    collector: Arc<MetricsCollector<C>>,
    clock: Arc<C>,
}

impl<C: Clock> PipelineHook<C> {
    /// Hook over the engine's injector and collector.
    pub fn with_clock(
        router: Arc<SplitRouter>,
        injector: Arc<HandlerInjector<C>>,
        collector: Arc<MetricsCollector<C>>,
        clock: C,
    ) -> Self {
        Self { router, injector, collector, clock: Arc::new(clock) }
    }

    /// Serve one request through the engine.
    ///
    /// Patch failures become server-error responses here — the continuation
    /// was already consulted or bypassed by the patch, and the host must
    /// always get a response back.
    pub fn handle(
        &self,
        route: &str,
        request: &PatchRequest,
        next: Continuation<'_>,
    ) -> PatchResponse {
        let started = self.clock.now();

        let response = match self.router.lane(route) {
            Lane::Canary => match self.injector.route_injection(route, request) {
                Some(injection_id) => {
                    match self.injector.invoke(injection_id, request, next) {
                        Ok(response) => response,
                        Err(error) => {
                            debug!(route, error = %error, "patch failure surfaced as 500");
                            PatchResponse::server_error(error.to_string())
                        }
                    }
                }
                // Canary lane but nothing attached/matching: stable behaviour
                None => next(request),
            },
            Lane::Stable => next(request),
        };

        let latency = self.clock.now().saturating_duration_since(started);
        let sample = MetricSample::new(
            route,
            StatusClass::from_status(response.status),
            latency.as_secs_f64() * 1_000.0,
            self.clock.timestamp(),
        );
        // Unmonitored routes drop the sample inside the collector
        self.collector.record_sample(&sample);

        response
    }
}

impl PipelineHook<SystemClock> {
    /// Hook on the system clock.
    pub fn new(
        router: Arc<SplitRouter>,
        injector: Arc<HandlerInjector<SystemClock>>,
        collector: Arc<MetricsCollector<SystemClock>>,
    ) -> Self {
        Self::with_clock(router, injector, collector, SystemClock)
    }
}

impl<C: Clock> std::fmt::Debug for PipelineHook<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHook").finish()
    }
}
