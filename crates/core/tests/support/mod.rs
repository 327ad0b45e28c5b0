//! Shared test helpers for `canopy-core` integration tests.
//!
//! These helpers provide reusable fixtures and lightweight doubles so the
//! flow tests can focus on behaviour instead of boilerplate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::ports::{Continuation, PatchHandler, TrafficRouter};
use canopy_domain::{
    CanopyError, DeploymentPlan, EngineConfig, MetricSample, MonitoringConfig, PatchInvokeError,
    PatchRequest, PatchResponse, Result, Stage, StatusClass,
};
use chrono::Utc;
use uuid::Uuid;

/// One observed router interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterCall {
    Set(String, u8),
    Clear(String),
}

/// Router double that records every call instead of moving traffic.
#[derive(Debug)]
pub struct RecordingRouter {
    calls: Mutex<Vec<RouterCall>>,
    gradual: bool,
    fail_splits: bool,
}

impl RecordingRouter {
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()), gradual: true, fail_splits: false }
    }

    /// A router that refuses stepped reductions.
    #[allow(dead_code)]
    pub fn without_gradual() -> Self {
        Self { gradual: false, ..Self::new() }
    }

    /// A router whose split changes fail (for best-effort rollback tests).
    #[allow(dead_code)]
    pub fn failing() -> Self {
        Self { fail_splits: true, ..Self::new() }
    }

    pub fn calls(&self) -> Vec<RouterCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// The percentages of every `Set` call, in order.
    pub fn set_percentages(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RouterCall::Set(_, percentage) => Some(percentage),
                RouterCall::Clear(_) => None,
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn cleared_routes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RouterCall::Clear(route) => Some(route),
                RouterCall::Set(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl TrafficRouter for RecordingRouter {
    async fn set_split(&self, route: &str, percentage: u8) -> Result<()> {
        if self.fail_splits {
            return Err(CanopyError::Router("synthetic router failure".to_string()));
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RouterCall::Set(route.to_string(), percentage));
        }
        Ok(())
    }

    async fn clear_split(&self, route: &str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RouterCall::Clear(route.to_string()));
        }
        Ok(())
    }

    fn supports_gradual(&self) -> bool {
        self.gradual
    }
}

struct OkHandler;

impl PatchHandler for OkHandler {
    fn invoke(
        &self,
        _request: &PatchRequest,
        _next: Continuation<'_>,
    ) -> std::result::Result<PatchResponse, PatchInvokeError> {
        Ok(PatchResponse::ok("patched"))
    }
}

/// A handler that answers every request itself.
pub fn ok_handler() -> Arc<dyn PatchHandler> {
    Arc::new(OkHandler)
}

struct FailingHandler;

impl PatchHandler for FailingHandler {
    fn invoke(
        &self,
        _request: &PatchRequest,
        _next: Continuation<'_>,
    ) -> std::result::Result<PatchResponse, PatchInvokeError> {
        Err(PatchInvokeError::new("synthetic failure"))
    }
}

/// A handler that always fails.
#[allow(dead_code)]
pub fn failing_handler() -> Arc<dyn PatchHandler> {
    Arc::new(FailingHandler)
}

/// Engine configuration with poll cadences tight enough for tests.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.monitor.poll_interval = Duration::from_millis(20);
    config.breaker.poll_interval = Duration::from_millis(20);
    config.breaker.min_samples = 10;
    config.deployer.stage_safety_buffer = Duration::from_secs(2);
    config
}

/// A plan whose stages and sampling are measured in milliseconds.
pub fn fast_plan(
    patch_id: Uuid,
    percentages: &[u8],
    stage_ms: u64,
    interval_ms: u64,
) -> DeploymentPlan {
    let stages = percentages
        .iter()
        .map(|&p| Stage::new(p, Duration::from_millis(stage_ms)))
        .collect();
    let mut plan = DeploymentPlan::new(patch_id, stages);
    plan.monitoring = MonitoringConfig {
        window: Duration::from_secs(60),
        sample_interval: Duration::from_millis(interval_ms),
    };
    plan
}

/// Feed `count` samples of one outcome into a route.
pub fn feed_samples(
    collector: &canopy_core::MetricsCollector,
    route: &str,
    count: usize,
    status: StatusClass,
    latency_ms: f64,
) {
    for _ in 0..count {
        collector.record_sample(&MetricSample::new(route, status, latency_ms, Utc::now()));
    }
}
