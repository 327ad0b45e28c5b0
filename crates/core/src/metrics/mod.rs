//! Per-route metrics collection and health evaluation

pub mod collector;

pub use collector::MetricsCollector;
