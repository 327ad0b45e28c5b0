//! Resilience primitives shared by the engine
//!
//! Two small, generic building blocks:
//! - **[`CapacityGate`]**: a reject-on-full concurrency cap. Callers either
//!   get a permit immediately or are refused; nothing queues. Backs the
//!   active-patch cap and the concurrent-deployment cap.
//! - **[`LatencyHistogram`]**: lock-free latency distribution tracking with
//!   logarithmic buckets, used for per-injection invocation timing.

pub mod capacity;
pub mod histogram;

pub use capacity::{CapacityGate, CapacityMetrics, CapacityPermit};
pub use histogram::{LatencyHistogram, LatencyPercentiles, LatencySnapshot};
