//! Handler patch manifest and request shapes
//!
//! A [`HandlerPatch`] is the immutable description handed over by the
//! code-generation collaborator alongside an already-instantiated callable.
//! The engine never evaluates patch source; the optional `source` field is
//! retained for audit and best-effort static scanning only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared parameter list of the generated handler.
///
/// The expected shape is the (request, response, continuation) triple; the
/// validator rejects anything else before attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSignature {
    pub params: Vec<String>,
}

impl HandlerSignature {
    /// The conventional middleware signature.
    pub fn middleware() -> Self {
        Self {
            params: vec!["request".to_string(), "response".to_string(), "next".to_string()],
        }
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Request match conditions for a patch.
///
/// An empty list or map matches everything for that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConditions {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl MatchConditions {
    /// Conditions that match every request on the route.
    pub fn any() -> Self {
        Self::default()
    }
}

/// Immutable manifest for a runtime handler patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerPatch {
    pub id: Uuid,
    pub name: String,
    /// Route the patch targets, e.g. `/api/orders`.
    pub target_route: String,
    #[serde(default)]
    pub match_conditions: MatchConditions,
    pub signature: HandlerSignature,
    /// Generated source retained for audit; never evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl HandlerPatch {
    /// Create a manifest with the conventional middleware signature.
    pub fn new(name: impl Into<String>, target_route: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target_route: target_route.into(),
            match_conditions: MatchConditions::any(),
            signature: HandlerSignature::middleware(),
            source: None,
            priority: 0,
            created_at: Utc::now(),
        }
    }

    /// Attach match conditions.
    pub fn with_conditions(mut self, conditions: MatchConditions) -> Self {
        self.match_conditions = conditions;
        self
    }

    /// Attach the generated source for audit/scanning.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Override the declared signature.
    pub fn with_signature(mut self, signature: HandlerSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Set the patch priority (higher wins when several patches match).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// In-process request shape the host maps its requests onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl PatchRequest {
    /// Convenience constructor for the common case.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self { method: method.into(), path: path.into(), headers: BTreeMap::new(), body: None }
    }
}

/// In-process response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl PatchResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: Some(body.into()) }
    }

    /// An opaque server failure.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self { status: 500, body: Some(message.into()) }
    }

    /// Whether this response counts as a server-side failure.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the default manifest carries the middleware signature.
    #[test]
    fn test_patch_defaults() {
        let patch = HandlerPatch::new("orders-fix", "/api/orders");
        assert_eq!(patch.signature.arity(), 3);
        assert_eq!(patch.match_conditions, MatchConditions::any());
        assert_eq!(patch.priority, 0);
        assert!(patch.source.is_none());
    }

    /// Validates builder-style setters compose.
    #[test]
    fn test_patch_builders() {
        let conditions = MatchConditions {
            methods: vec!["POST".to_string()],
            ..MatchConditions::default()
        };
        let patch = HandlerPatch::new("orders-fix", "/api/orders")
            .with_conditions(conditions.clone())
            .with_source("module.exports = (req, res, next) => next()")
            .with_priority(5);

        assert_eq!(patch.match_conditions, conditions);
        assert_eq!(patch.priority, 5);
        assert!(patch.source.is_some());
    }

    /// Validates manifests survive a serde round trip.
    #[test]
    fn test_patch_serde_round_trip() {
        let patch = HandlerPatch::new("orders-fix", "/api/orders");
        let json = serde_json::to_string(&patch).unwrap();
        let back: HandlerPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, patch.id);
        assert_eq!(back.target_route, "/api/orders");
    }

    /// Validates server-error classification on responses.
    #[test]
    fn test_response_classification() {
        assert!(!PatchResponse::ok("done").is_server_error());
        assert!(PatchResponse::server_error("boom").is_server_error());
        assert!(!PatchResponse { status: 404, body: None }.is_server_error());
    }
}
