//! Rollback decision, execution, and the standing circuit breaker

pub mod breaker;
pub mod executor;
pub mod monitor;
pub mod triggers;

pub use breaker::{BreakerMetrics, BreakerState, RouteCircuitBreaker};
pub use executor::RollbackExecutor;
pub use monitor::RollbackMonitor;
pub use triggers::{triggers_for, TriggerDecision, TriggerEvaluator};
