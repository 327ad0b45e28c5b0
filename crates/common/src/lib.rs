//! Shared foundation utilities for the Canopy workspace.
//!
//! This crate carries the pieces every other Canopy crate leans on but that
//! contain no deployment semantics of their own:
//!
//! - `time`: the [`time::Clock`] abstraction (real and mock implementations)
//!   so every time-sensitive decision in the engine can be driven
//!   deterministically in tests.
//! - `resilience`: concurrency capping ([`resilience::CapacityGate`]) and
//!   latency distribution tracking ([`resilience::LatencyHistogram`]).
//!
//! No other canopy crate is a dependency of this one.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;
pub mod time;

pub use resilience::{CapacityGate, CapacityMetrics, CapacityPermit, LatencyHistogram};
pub use time::{Clock, MockClock, SystemClock};
