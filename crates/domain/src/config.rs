//! Engine configuration structures
//!
//! Each component has its own config struct with sensible defaults; the
//! top-level [`EngineConfig`] aggregates them and validates the whole set at
//! engine construction. Validation failures are configuration errors, not
//! runtime surprises.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::errors::{CanopyError, Result};

/// Configuration for the metrics collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// How long samples are retained before lazy eviction.
    pub retention: Duration,
    /// Hard cap on retained samples per route (whichever trips first).
    pub max_samples_per_route: usize,
    /// Evict at most once per this many writes.
    pub eviction_stride: usize,
    /// Window used when callers do not specify one.
    pub default_window: Duration,
    /// Sample-size floor below which rates are statistically unreliable.
    pub min_sample_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            retention: constants::SAMPLE_RETENTION,
            max_samples_per_route: constants::MAX_SAMPLES_PER_ROUTE,
            eviction_stride: constants::EVICTION_STRIDE,
            default_window: constants::DEFAULT_MONITORING_WINDOW,
            min_sample_size: constants::MIN_SAMPLE_SIZE,
        }
    }
}

impl CollectorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.retention.is_zero() {
            return Err(CanopyError::Config("retention must be non-zero".to_string()));
        }
        if self.max_samples_per_route == 0 {
            return Err(CanopyError::Config(
                "max_samples_per_route must be greater than 0".to_string(),
            ));
        }
        if self.eviction_stride == 0 {
            return Err(CanopyError::Config("eviction_stride must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Configuration for the handler injector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    /// How many patches may be simultaneously active.
    pub max_active_patches: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self { max_active_patches: constants::DEFAULT_MAX_ACTIVE_PATCHES }
    }
}

impl InjectorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_active_patches == 0 {
            return Err(CanopyError::Config(
                "max_active_patches must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the canary deployer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfig {
    /// How many deployments may run concurrently.
    pub max_concurrent_deployments: usize,
    /// Slack added to each stage duration before the stage is force-failed.
    pub stage_safety_buffer: Duration,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deployments: constants::DEFAULT_MAX_CONCURRENT_DEPLOYMENTS,
            stage_safety_buffer: constants::STAGE_SAFETY_BUFFER,
        }
    }
}

impl DeployerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_deployments == 0 {
            return Err(CanopyError::Config(
                "max_concurrent_deployments must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the rollback monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll cadence; may be shorter than the deployer's own sampling.
    pub poll_interval: Duration,
    /// Trailing window for sustained-violation counting.
    pub sustained_window: Duration,
    /// Violations of the same metric within the window that force rollback.
    pub sustained_violations: usize,
    /// Single-observation error-rate ceiling that trips immediately.
    pub critical_error_rate: f64,
    /// Single-observation success-rate floor that trips immediately.
    pub critical_success_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            sustained_window: constants::SUSTAINED_VIOLATION_WINDOW,
            sustained_violations: constants::SUSTAINED_VIOLATION_COUNT,
            critical_error_rate: constants::CRITICAL_ERROR_RATE,
            critical_success_rate: constants::CRITICAL_SUCCESS_RATE,
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CanopyError::Config("poll_interval must be non-zero".to_string()));
        }
        if self.sustained_violations == 0 {
            return Err(CanopyError::Config(
                "sustained_violations must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.critical_error_rate)
            || !(0.0..=1.0).contains(&self.critical_success_rate)
        {
            return Err(CanopyError::Config(
                "critical rates must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the route circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Error rate above which the breaker trips.
    pub error_rate_threshold: f64,
    /// Samples required before the breaker considers a route at all.
    pub min_samples: usize,
    /// Poll cadence of the standing breaker loop.
    pub poll_interval: Duration,
    /// Window the breaker evaluates error rates over.
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: constants::CRITICAL_ERROR_RATE,
            min_samples: 20,
            poll_interval: Duration::from_secs(10),
            window: constants::DEFAULT_MONITORING_WINDOW,
        }
    }
}

impl BreakerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(CanopyError::Config(
                "error_rate_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.min_samples == 0 {
            return Err(CanopyError::Config("min_samples must be greater than 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(CanopyError::Config("poll_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub collector: CollectorConfig,
    pub injector: InjectorConfig,
    pub deployer: DeployerConfig,
    pub monitor: MonitorConfig,
    pub breaker: BreakerConfig,
}

impl EngineConfig {
    /// Validate every component configuration.
    pub fn validate(&self) -> Result<()> {
        self.collector.validate()?;
        self.injector.validate()?;
        self.deployer.validate()?;
        self.monitor.validate()?;
        self.breaker.validate()?;
        Ok(())
    }
}
