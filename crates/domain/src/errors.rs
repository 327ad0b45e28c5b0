//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Canopy.
///
/// Only `Validation` and `Capacity` are returned synchronously from a
/// deployment request; everything else surfaces as an asynchronous outcome
/// recorded on the deployment status and its event log.
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CanopyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Health check failure: {0}")]
    HealthCheck(String),

    #[error("Rollback execution error: {0}")]
    RollbackExecution(String),

    #[error("Monitoring timed out: {0}")]
    MonitoringTimeout(String),

    #[error("Router error: {0}")]
    Router(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Canopy operations.
pub type Result<T> = std::result::Result<T, CanopyError>;

/// Failure surfaced by a handler patch during invocation.
///
/// Patch failures are counted against the injection and forwarded to the
/// caller; they never escape as panics.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("handler patch failed: {0}")]
pub struct PatchInvokeError(pub String);

impl PatchInvokeError {
    /// Wrap any displayable failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the serde tagging scheme round-trips a variant.
    #[test]
    fn test_error_serde_round_trip() {
        let err = CanopyError::Capacity("deployment slots exhausted".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Capacity\""));

        let back: CanopyError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, CanopyError::Capacity(m) if m.contains("exhausted")));
    }

    /// Validates display formatting carries the variant context.
    #[test]
    fn test_error_display() {
        let err = CanopyError::Validation("arity mismatch".to_string());
        assert_eq!(err.to_string(), "Validation error: arity mismatch");
    }
}
