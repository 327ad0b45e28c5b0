//! Port interfaces between the engine and the host request pipeline
//!
//! The engine does not own an HTTP server. The host wires these traits in:
//! a [`TrafficRouter`] that realizes traffic splits, and [`PatchHandler`]
//! implementations handed over (already instantiated) by the
//! code-generation collaborator. Patch source is never evaluated here; by
//! the time the engine sees a patch it is a compiled, callable unit plus a
//! manifest.

use async_trait::async_trait;
use canopy_domain::{PatchInvokeError, PatchRequest, PatchResponse, Result};

/// The pre-patch handler for a route.
///
/// Invoking it unchanged is the passthrough path a detached patch falls
/// back to.
pub type Continuation<'a> = &'a (dyn Fn(&PatchRequest) -> PatchResponse + Send + Sync);

/// An instantiated handler patch.
///
/// The (request, response, continuation) shape of the generated middleware
/// maps onto this trait: the implementation receives the request, produces
/// the response, and may delegate to `next` for pre-patch behaviour.
/// Failures are returned, not thrown; the injector additionally catches
/// panics so a misbehaving patch cannot take the host down.
pub trait PatchHandler: Send + Sync {
    /// Handle one request, optionally delegating to the continuation.
    fn invoke(
        &self,
        request: &PatchRequest,
        next: Continuation<'_>,
    ) -> std::result::Result<PatchResponse, PatchInvokeError>;
}

/// Blanket impl so plain closures can serve as handlers in tests and hosts.
impl<F> PatchHandler for F
where
    F: Fn(&PatchRequest, Continuation<'_>) -> std::result::Result<PatchResponse, PatchInvokeError>
        + Send
        + Sync,
{
    fn invoke(
        &self,
        request: &PatchRequest,
        next: Continuation<'_>,
    ) -> std::result::Result<PatchResponse, PatchInvokeError> {
        self(request, next)
    }
}

/// Traffic split control owned by the host's router.
///
/// The engine only ever raises a route's split while a deployment advances
/// and lowers it during rollback; the router realizes the percentage as an
/// independent per-request draw (see the infra implementation).
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Route `percentage` percent of matching requests through the patch.
    async fn set_split(&self, route: &str, percentage: u8) -> Result<()>;

    /// Remove the split entirely; all traffic returns to the stable lane.
    async fn clear_split(&self, route: &str) -> Result<()>;

    /// Whether stepped traffic reduction can be expressed safely.
    ///
    /// Routers that cannot step make `Gradual` rollback degrade to
    /// `Immediate`.
    fn supports_gradual(&self) -> bool {
        true
    }
}
