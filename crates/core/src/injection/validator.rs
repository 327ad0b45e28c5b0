//! Defensive patch validation before attachment
//!
//! The code-generation collaborator has already vetted the patch; this is a
//! minimal re-check, not a sandbox. The structural checks enforce the
//! manifest shape; the source scan is a denylist over known-dangerous
//! constructs and is best-effort only — it catches the obvious, nothing
//! more.

use canopy_domain::constants::HANDLER_ARITY;
use canopy_domain::{CanopyError, HandlerPatch, Result};
use tracing::debug;

/// Tokens that disqualify a patch source outright: dynamic code evaluation,
/// process control, and filesystem primitives have no business inside a
/// request handler.
const FORBIDDEN_TOKENS: &[&str] = &[
    "eval(",
    "new Function",
    "Function(",
    "child_process",
    "process.exit",
    "require('fs')",
    "require(\"fs\")",
    "execSync",
    "spawnSync",
    "std::process::Command",
    "std::fs::",
];

/// Validates patch manifests before the injector will touch them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchValidator;

impl PatchValidator {
    pub fn new() -> Self {
        Self
    }

    /// Run all checks; the first failure wins.
    pub fn validate(&self, patch: &HandlerPatch) -> Result<()> {
        self.validate_manifest(patch)?;
        self.scan_source(patch)?;
        debug!(patch = %patch.name, route = %patch.target_route, "patch passed validation");
        Ok(())
    }

    fn validate_manifest(&self, patch: &HandlerPatch) -> Result<()> {
        if patch.name.trim().is_empty() {
            return Err(CanopyError::Validation("patch name is empty".to_string()));
        }
        if !patch.target_route.starts_with('/') {
            return Err(CanopyError::Validation(format!(
                "target route '{}' must start with '/'",
                patch.target_route
            )));
        }
        if patch.signature.arity() != HANDLER_ARITY {
            return Err(CanopyError::Validation(format!(
                "handler declares {} parameters, expected {} (request, response, continuation)",
                patch.signature.arity(),
                HANDLER_ARITY
            )));
        }
        for method in &patch.match_conditions.methods {
            if method.trim().is_empty() {
                return Err(CanopyError::Validation(
                    "match conditions contain an empty method".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn scan_source(&self, patch: &HandlerPatch) -> Result<()> {
        let Some(source) = &patch.source else {
            return Ok(());
        };
        for token in FORBIDDEN_TOKENS {
            if source.contains(token) {
                return Err(CanopyError::Validation(format!(
                    "patch source contains forbidden construct '{token}'"
                )));
            }
        }
        Ok(())
    }
}
