//! Handler patch attachment, wrapping, and invocation accounting
//!
//! Every attached patch gets an [`InjectionRecord`] wrapper that times and
//! counts each invocation, catches handler failures and panics, and holds
//! the `active` flag that realizes soft detachment: a detached patch stays
//! in the table but short-circuits to the continuation on every call.
//! Patches are never physically removed from the request path; disabling is
//! logical and the record remains for audit. This is a deliberate design
//! choice of the engine, not a gap — hosts that need true removal own their
//! route table and can rebuild it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use canopy_common::resilience::{CapacityGate, CapacityPermit, LatencyHistogram, LatencySnapshot};
use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{
    CanopyError, HandlerPatch, InjectorConfig, PatchInvokeError, PatchRequest, PatchResponse,
    Result,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::injection::matcher::request_matches;
use crate::injection::validator::PatchValidator;
use crate::ports::{Continuation, PatchHandler};

/// One attached patch with its wrapper state.
pub struct InjectionRecord {
    id: Uuid,
    patch: HandlerPatch,
    attached_at: DateTime<Utc>,
    active: AtomicBool,
    request_count: AtomicU64,
    error_count: AtomicU64,
    latency: LatencyHistogram,
    handler: RwLock<Arc<dyn PatchHandler>>,
    permit: Mutex<Option<CapacityPermit>>,
}

impl InjectionRecord {
    fn new(
        patch: HandlerPatch,
        handler: Arc<dyn PatchHandler>,
        permit: CapacityPermit,
        attached_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patch,
            attached_at,
            active: AtomicBool::new(true),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latency: LatencyHistogram::new(),
            handler: RwLock::new(handler),
            permit: Mutex::new(Some(permit)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn patch(&self) -> &HandlerPatch {
        &self.patch
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// Whether the patch is still serving traffic.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Acquire)
    }

    /// Fraction of invocations that failed.
    pub fn error_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            return 0.0;
        }
        self.error_count() as f64 / requests as f64
    }

    /// Latency distribution of patch invocations.
    pub fn latency_snapshot(&self) -> LatencySnapshot {
        self.latency.snapshot()
    }

    /// Disable the patch and free its capacity slot. Idempotent.
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        if let Ok(mut permit) = self.permit.lock() {
            permit.take();
        }
    }

    fn swap_handler(&self, handler: Arc<dyn PatchHandler>) {
        let mut guard = match self.handler.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = handler;
    }

    fn current_handler(&self) -> Arc<dyn PatchHandler> {
        let guard = match self.handler.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&guard)
    }
}

impl std::fmt::Debug for InjectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionRecord")
            .field("id", &self.id)
            .field("patch", &self.patch.name)
            .field("active", &self.is_active())
            .field("requests", &self.request_count())
            .field("errors", &self.error_count())
            .finish()
    }
}

/// Aggregate view across all injections.
#[derive(Debug, Clone)]
pub struct InjectorStats {
    pub active_count: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub avg_error_rate: f64,
}

/// Attaches, detaches, and invokes handler patches.
pub struct HandlerInjector<C: Clock = SystemClock> {
    records: RwLock<HashMap<Uuid, Arc<InjectionRecord>>>,
    gate: CapacityGate,
    validator: PatchValidator,
    clock: Arc<C>,
}

impl HandlerInjector<SystemClock> {
    /// Injector on the system clock.
    pub fn new(config: InjectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> HandlerInjector<C> {
    /// Injector with a custom clock.
    pub fn with_clock(config: InjectorConfig, clock: C) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            gate: CapacityGate::new(config.max_active_patches),
            validator: PatchValidator::new(),
            clock: Arc::new(clock),
        }
    }

    /// Validate and attach a patch, returning the injection id.
    ///
    /// Fails with `Validation` for a malformed manifest or a duplicate
    /// active attachment on the same (route, conditions) tuple, and with
    /// `Capacity` when the active-patch cap is reached — capacity failures
    /// are immediate, never queued.
    pub fn attach(&self, patch: HandlerPatch, handler: Arc<dyn PatchHandler>) -> Result<Uuid> {
        self.validator.validate(&patch)?;

        let mut records = self.write_records();
        let duplicate = records.values().any(|record| {
            record.is_active()
                && record.patch.target_route == patch.target_route
                && record.patch.match_conditions == patch.match_conditions
        });
        if duplicate {
            return Err(CanopyError::Validation(format!(
                "an active patch already serves '{}' with identical conditions",
                patch.target_route
            )));
        }

        let Some(permit) = self.gate.try_acquire() else {
            return Err(CanopyError::Capacity(format!(
                "active patch limit of {} reached",
                self.gate.capacity()
            )));
        };

        let record =
            Arc::new(InjectionRecord::new(patch, handler, permit, self.clock.timestamp()));
        let id = record.id();
        info!(injection_id = %id, patch = %record.patch.name, route = %record.patch.target_route,
            "handler patch attached");
        records.insert(id, record);
        Ok(id)
    }

    /// Soft-detach a patch: it stays in the table but every subsequent
    /// invocation passes through to the continuation unchanged.
    pub fn detach(&self, id: Uuid) -> Result<()> {
        let record = self.record(id)?;
        record.deactivate();
        info!(injection_id = %id, patch = %record.patch.name, "handler patch detached");
        Ok(())
    }

    /// Swap the callable behind an injection, keeping its counters.
    pub fn replace(&self, id: Uuid, handler: Arc<dyn PatchHandler>) -> Result<()> {
        let record = self.record(id)?;
        record.swap_handler(handler);
        debug!(injection_id = %id, "handler patch replaced");
        Ok(())
    }

    /// Look up an injection record.
    pub fn record(&self, id: Uuid) -> Result<Arc<InjectionRecord>> {
        self.read_records()
            .get(&id)
            .cloned()
            .ok_or_else(|| CanopyError::NotFound(format!("injection {id}")))
    }

    /// Whether `request` satisfies the injection's match conditions.
    pub fn matches(&self, id: Uuid, request: &PatchRequest) -> Result<bool> {
        let record = self.record(id)?;
        Ok(request_matches(&record.patch.match_conditions, request))
    }

    /// The active injection serving `route` for this request, if any.
    ///
    /// When several active patches match, the highest priority wins.
    pub fn route_injection(&self, route: &str, request: &PatchRequest) -> Option<Uuid> {
        self.read_records()
            .values()
            .filter(|record| {
                record.is_active()
                    && record.patch.target_route == route
                    && request_matches(&record.patch.match_conditions, request)
            })
            .max_by_key(|record| record.patch.priority)
            .map(|record| record.id())
    }

    /// Invoke the wrapped patch for one request.
    ///
    /// Inactive records pass the request straight to the continuation. An
    /// active invocation is always timed and counted; handler errors and
    /// panics are counted as failures and surfaced to the caller — never
    /// swallowed, never allowed to unwind into the host.
    pub fn invoke(
        &self,
        id: Uuid,
        request: &PatchRequest,
        next: Continuation<'_>,
    ) -> std::result::Result<PatchResponse, PatchInvokeError> {
        let record = match self.record(id) {
            Ok(record) => record,
            Err(_) => return Err(PatchInvokeError::new(format!("unknown injection {id}"))),
        };

        if !record.is_active() {
            return Ok(next(request));
        }

        let handler = record.current_handler();
        let started = self.clock.now();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.invoke(request, next)));
        record.latency.record(self.clock.now().saturating_duration_since(started));
        record.request_count.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => {
                record.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(injection_id = %id, error = %error, "handler patch returned failure");
                Err(error)
            }
            Err(_panic) => {
                record.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(injection_id = %id, "handler patch panicked");
                Err(PatchInvokeError::new("handler patch panicked"))
            }
        }
    }

    /// All records still marked active.
    pub fn active_records(&self) -> Vec<Arc<InjectionRecord>> {
        self.read_records().values().filter(|r| r.is_active()).cloned().collect()
    }

    /// Number of active patches.
    pub fn active_count(&self) -> usize {
        self.read_records().values().filter(|r| r.is_active()).count()
    }

    /// Aggregate statistics across all injections, active or not.
    pub fn stats(&self) -> InjectorStats {
        let records = self.read_records();
        let mut total_requests = 0u64;
        let mut total_errors = 0u64;
        let mut active_count = 0usize;
        for record in records.values() {
            total_requests += record.request_count();
            total_errors += record.error_count();
            if record.is_active() {
                active_count += 1;
            }
        }
        let avg_error_rate = if total_requests == 0 {
            0.0
        } else {
            total_errors as f64 / total_requests as f64
        };
        InjectorStats { active_count, total_requests, total_errors, avg_error_rate }
    }

    /// Disable every patch at once. Idempotent; the last line of defense.
    pub fn emergency_stop_all(&self) {
        let records = self.read_records();
        let mut stopped = 0usize;
        for record in records.values() {
            if record.is_active() {
                record.deactivate();
                stopped += 1;
            }
        }
        if stopped > 0 {
            warn!(stopped, "emergency stop disabled all active patches");
        }
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<InjectionRecord>>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_records(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<InjectionRecord>>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use canopy_domain::HandlerSignature;

    use super::*;

    fn passthrough_continuation() -> impl Fn(&PatchRequest) -> PatchResponse + Send + Sync {
        |_request: &PatchRequest| PatchResponse::ok("stable")
    }

    struct OkHandler;

    impl PatchHandler for OkHandler {
        fn invoke(
            &self,
            _request: &PatchRequest,
            _next: Continuation<'_>,
        ) -> std::result::Result<PatchResponse, PatchInvokeError> {
            Ok(PatchResponse::ok("patched"))
        }
    }

    struct FailingHandler;

    impl PatchHandler for FailingHandler {
        fn invoke(
            &self,
            _request: &PatchRequest,
            _next: Continuation<'_>,
        ) -> std::result::Result<PatchResponse, PatchInvokeError> {
            Err(PatchInvokeError::new("synthetic failure"))
        }
    }

    struct PanickingHandler;

    impl PatchHandler for PanickingHandler {
        fn invoke(
            &self,
            _request: &PatchRequest,
            _next: Continuation<'_>,
        ) -> std::result::Result<PatchResponse, PatchInvokeError> {
            panic!("synthetic panic")
        }
    }

    fn ok_handler() -> Arc<dyn PatchHandler> {
        Arc::new(OkHandler)
    }

    fn failing_handler() -> Arc<dyn PatchHandler> {
        Arc::new(FailingHandler)
    }

    fn injector() -> HandlerInjector {
        HandlerInjector::new(InjectorConfig::default())
    }

    /// Validates attach/invoke happy path counts the invocation.
    #[test]
    fn test_attach_and_invoke() {
        let injector = injector();
        let id = injector
            .attach(HandlerPatch::new("fix", "/api/orders"), ok_handler())
            .unwrap();

        let next = passthrough_continuation();
        let response = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert_eq!(response.unwrap().body.as_deref(), Some("patched"));

        let record = injector.record(id).unwrap();
        assert_eq!(record.request_count(), 1);
        assert_eq!(record.error_count(), 0);
        assert_eq!(record.latency_snapshot().count(), 1);
    }

    /// Validates a detached patch passes through to the continuation on the
    /// very next request.
    #[test]
    fn test_detach_short_circuits() {
        let injector = injector();
        let id = injector
            .attach(HandlerPatch::new("fix", "/api/orders"), ok_handler())
            .unwrap();
        injector.detach(id).unwrap();

        let next = passthrough_continuation();
        let response = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert_eq!(response.unwrap().body.as_deref(), Some("stable"));

        // Passthrough invocations are not charged to the patch
        let record = injector.record(id).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.request_count(), 0);
    }

    /// Validates handler failures are counted and surfaced, not swallowed.
    #[test]
    fn test_handler_failure_counted_and_forwarded() {
        let injector = injector();
        let id = injector
            .attach(HandlerPatch::new("fix", "/api/orders"), failing_handler())
            .unwrap();

        let next = passthrough_continuation();
        let result = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert!(result.is_err());

        let record = injector.record(id).unwrap();
        assert_eq!(record.request_count(), 1);
        assert_eq!(record.error_count(), 1);
        assert_eq!(record.error_rate(), 1.0);
    }

    /// Validates a panicking handler is contained and counted as an error.
    #[test]
    fn test_handler_panic_contained() {
        let injector = injector();
        let id = injector
            .attach(HandlerPatch::new("fix", "/api/orders"), Arc::new(PanickingHandler))
            .unwrap();

        let next = passthrough_continuation();
        let result = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert!(result.is_err());
        assert_eq!(injector.record(id).unwrap().error_count(), 1);
    }

    /// Validates the capacity cap fails attach immediately, without queueing.
    #[test]
    fn test_capacity_cap() {
        let injector =
            HandlerInjector::new(InjectorConfig { max_active_patches: 1 });
        injector
            .attach(HandlerPatch::new("first", "/api/a"), ok_handler())
            .unwrap();

        let err = injector.attach(HandlerPatch::new("second", "/api/b"), ok_handler());
        assert!(matches!(err, Err(CanopyError::Capacity(_))));

        // Detaching frees the slot
        let first_id = injector.active_records()[0].id();
        injector.detach(first_id).unwrap();
        assert!(injector
            .attach(HandlerPatch::new("third", "/api/c"), ok_handler())
            .is_ok());
    }

    /// Validates duplicate active attachment on the same tuple is rejected.
    #[test]
    fn test_duplicate_attachment_rejected() {
        let injector = injector();
        injector
            .attach(HandlerPatch::new("first", "/api/orders"), ok_handler())
            .unwrap();

        let err = injector.attach(HandlerPatch::new("second", "/api/orders"), ok_handler());
        assert!(matches!(err, Err(CanopyError::Validation(_))));
    }

    /// Validates a bad-arity patch never reaches the table.
    #[test]
    fn test_invalid_patch_never_attached() {
        let injector = injector();
        let patch = HandlerPatch::new("fix", "/api/orders").with_signature(HandlerSignature {
            params: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        });

        assert!(injector.attach(patch, ok_handler()).is_err());
        assert_eq!(injector.active_count(), 0);
        assert_eq!(injector.stats().total_requests, 0);
    }

    /// Validates `replace` swaps behaviour but keeps counters.
    #[test]
    fn test_replace_keeps_counters() {
        let injector = injector();
        let id = injector
            .attach(HandlerPatch::new("fix", "/api/orders"), failing_handler())
            .unwrap();

        let next = passthrough_continuation();
        let _ = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert_eq!(injector.record(id).unwrap().error_count(), 1);

        injector.replace(id, ok_handler()).unwrap();
        let response = injector.invoke(id, &PatchRequest::new("GET", "/api/orders"), &next);
        assert!(response.is_ok());

        let record = injector.record(id).unwrap();
        assert_eq!(record.request_count(), 2);
        assert_eq!(record.error_count(), 1);
    }

    /// Validates routing picks the highest-priority matching patch.
    #[test]
    fn test_route_injection_priority() {
        let injector = injector();
        let low = injector
            .attach(HandlerPatch::new("low", "/api/orders").with_priority(1), ok_handler())
            .unwrap();
        // Same route but distinct conditions so both may be active
        let conditions = canopy_domain::MatchConditions {
            methods: vec!["GET".to_string()],
            ..canopy_domain::MatchConditions::default()
        };
        let high = injector
            .attach(
                HandlerPatch::new("high", "/api/orders")
                    .with_priority(9)
                    .with_conditions(conditions),
                ok_handler(),
            )
            .unwrap();

        let get = PatchRequest::new("GET", "/api/orders");
        assert_eq!(injector.route_injection("/api/orders", &get), Some(high));

        let post = PatchRequest::new("POST", "/api/orders");
        assert_eq!(injector.route_injection("/api/orders", &post), Some(low));

        assert_eq!(injector.route_injection("/api/users", &get), None);
    }

    /// Validates emergency stop leaves zero active patches and is idempotent.
    #[test]
    fn test_emergency_stop_all() {
        let injector = injector();
        injector
            .attach(HandlerPatch::new("a", "/api/a"), ok_handler())
            .unwrap();
        injector
            .attach(HandlerPatch::new("b", "/api/b"), ok_handler())
            .unwrap();
        assert_eq!(injector.active_count(), 2);

        injector.emergency_stop_all();
        assert_eq!(injector.active_count(), 0);

        injector.emergency_stop_all();
        assert_eq!(injector.active_count(), 0);
    }

    /// Validates aggregate statistics across injections.
    #[test]
    fn test_stats_aggregation() {
        let injector = injector();
        let ok_id = injector
            .attach(HandlerPatch::new("ok", "/api/a"), ok_handler())
            .unwrap();
        let bad_id = injector
            .attach(HandlerPatch::new("bad", "/api/b"), failing_handler())
            .unwrap();

        let next = passthrough_continuation();
        for _ in 0..3 {
            let _ = injector.invoke(ok_id, &PatchRequest::new("GET", "/api/a"), &next);
        }
        let _ = injector.invoke(bad_id, &PatchRequest::new("GET", "/api/b"), &next);

        let stats = injector.stats();
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_errors, 1);
        assert!((stats.avg_error_rate - 0.25).abs() < 1e-9);
    }
}
