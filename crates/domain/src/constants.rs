//! Engine constants
//!
//! Centralized location for all domain-level constants used throughout the
//! engine.

use std::time::Duration;

// Default canary ladder
pub const DEFAULT_STAGE_PERCENTAGES: [u8; 3] = [10, 50, 100];
pub const DEFAULT_STAGE_DURATION: Duration = Duration::from_secs(120);
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.95;
pub const DEFAULT_MAX_ERROR_RATE: f64 = 0.05;
pub const DEFAULT_LATENCY_INCREASE_RATIO: f64 = 2.0;

// Monitoring windows
pub const DEFAULT_MONITORING_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);
pub const STAGE_SAFETY_BUFFER: Duration = Duration::from_secs(30);

// Sample retention (whichever trips first)
pub const SAMPLE_RETENTION: Duration = Duration::from_secs(300);
pub const MAX_SAMPLES_PER_ROUTE: usize = 10_000;
pub const EVICTION_STRIDE: usize = 64;

// Statistical floor below which rates are treated as noise
pub const MIN_SAMPLE_SIZE: usize = 10;

// Rollback trigger rules
pub const CRITICAL_ERROR_RATE: f64 = 0.5;
pub const CRITICAL_SUCCESS_RATE: f64 = 0.5;
pub const SUSTAINED_VIOLATION_COUNT: usize = 3;
pub const SUSTAINED_VIOLATION_WINDOW: Duration = Duration::from_secs(60);

// Bounded audit structures
pub const EVENT_LOG_CAPACITY: usize = 256;
pub const METRIC_HISTORY_CAPACITY: usize = 64;
pub const ROLLBACK_HISTORY_CAPACITY: usize = 128;

// Concurrency defaults
pub const DEFAULT_MAX_CONCURRENT_DEPLOYMENTS: usize = 4;
pub const DEFAULT_MAX_ACTIVE_PATCHES: usize = 8;

// Handler shape expected from the code-generation collaborator:
// (request, response, continuation)
pub const HANDLER_ARITY: usize = 3;
