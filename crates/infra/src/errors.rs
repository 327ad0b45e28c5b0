//! Conversions from infrastructure failures into domain errors.

use canopy_domain::CanopyError;

/// Error newtype that keeps conversions on the infrastructure side and can
/// be converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CanopyError);

impl InfraError {
    /// A router-level failure.
    pub fn router(message: impl Into<String>) -> Self {
        Self(CanopyError::Router(message.into()))
    }
}

impl From<InfraError> for CanopyError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CanopyError> for InfraError {
    fn from(value: CanopyError) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the newtype round-trips through the domain error.
    #[test]
    fn test_round_trip() {
        let err = InfraError::router("split out of range");
        let domain: CanopyError = err.into();
        assert!(matches!(domain, CanopyError::Router(ref m) if m.contains("out of range")));

        let back: InfraError = domain.into();
        assert!(matches!(back.0, CanopyError::Router(_)));
    }
}
