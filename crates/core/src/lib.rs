//! # Canopy Core
//!
//! The staged rollout engine: state machine, monitoring, and rollback.
//!
//! This crate contains:
//! - The canary deployer and its per-deployment supervision tasks
//! - The rollback monitor, executor, and route circuit breaker
//! - The metrics collector and handler injector
//! - Port/adapter interfaces (traits) to the host request pipeline
//!
//! ## Architecture Principles
//! - Only depends on `canopy-common` and `canopy-domain`
//! - The host's router/pipeline is reached exclusively via traits
//! - Background tasks own a `CancellationToken` and never outlive their
//!   deployment
//! - No operation blocks indefinitely; every poll loop has a safety timeout

pub mod deploy;
pub mod engine;
pub mod injection;
pub mod metrics;
pub mod ports;
pub mod rollback;

// Re-export specific items to avoid ambiguity
pub use deploy::{planner, CanaryDeployer, DeploymentHandle, DeploymentRegistry};
pub use engine::CanopyEngine;
pub use injection::{HandlerInjector, InjectionRecord, InjectorStats, PatchValidator};
pub use metrics::MetricsCollector;
pub use ports::{Continuation, PatchHandler, TrafficRouter};
pub use rollback::{
    BreakerMetrics, BreakerState, RollbackExecutor, RollbackMonitor, RouteCircuitBreaker,
    TriggerDecision, TriggerEvaluator,
};
