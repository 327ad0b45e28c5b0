//! Rolling-window metrics collection per route
//!
//! The collector sits on the request hot path: `record_sample` is an O(1)
//! append under a per-route mutex, with eviction batched so its cost is
//! amortized across writes instead of paid per sample. Snapshots, baselines,
//! and health checks are read-side derivations and never mutate the buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use canopy_common::time::{Clock, SystemClock};
use canopy_domain::{
    BaselineComparison, CollectorConfig, HealthReport, HealthThresholds, MetricSample,
    MetricSnapshot, StatusClass,
};
use tracing::{debug, warn};

/// Sample as retained in the buffer: monotonic arrival time plus the two
/// fields snapshots aggregate. The route is the map key, not repeated per
/// sample.
#[derive(Debug, Clone, Copy)]
struct TimedSample {
    at: Instant,
    status: StatusClass,
    latency_ms: f64,
}

/// Per-route sample buffer and baseline.
struct RouteSeries {
    samples: Mutex<VecDeque<TimedSample>>,
    baseline: RwLock<Option<MetricSnapshot>>,
    writes_since_eviction: AtomicUsize,
}

impl RouteSeries {
    fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(256)),
            baseline: RwLock::new(None),
            writes_since_eviction: AtomicUsize::new(0),
        }
    }
}

/// Records request outcomes per route and derives rolling-window snapshots.
///
/// Shared by every deployment targeting a route and by the always-on
/// ingestion path; all methods take `&self`.
pub struct MetricsCollector<C: Clock = SystemClock> {
    routes: RwLock<HashMap<String, Arc<RouteSeries>>>,
    config: CollectorConfig,
    clock: Arc<C>,
}

impl MetricsCollector<SystemClock> {
    /// Collector on the system clock.
    pub fn new(config: CollectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> MetricsCollector<C> {
    /// Collector with a custom clock (used by tests to drive windows).
    pub fn with_clock(config: CollectorConfig, clock: C) -> Self {
        Self { routes: RwLock::new(HashMap::new()), config, clock: Arc::new(clock) }
    }

    /// Begin retaining samples for a route. Idempotent.
    pub fn start_collection(&self, route: &str) {
        let mut routes = match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if routes.contains_key(route) {
            debug!(route, "collection already started");
            return;
        }
        routes.insert(route.to_string(), Arc::new(RouteSeries::new()));
        debug!(route, "metrics collection started");
    }

    /// Stop retaining samples for a route and drop its buffer and baseline.
    pub fn stop_collection(&self, route: &str) {
        let mut routes = match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if routes.remove(route).is_some() {
            debug!(route, "metrics collection stopped");
        }
    }

    /// Whether a route is currently being collected.
    pub fn is_collecting(&self, route: &str) -> bool {
        self.read_routes().contains_key(route)
    }

    /// All routes currently being collected.
    pub fn routes(&self) -> Vec<String> {
        self.read_routes().keys().cloned().collect()
    }

    /// Record one request outcome. Cheap; called on the request hot path.
    ///
    /// Samples for routes without active collection are dropped silently:
    /// the ingestion hook fires for every request, monitored or not.
    pub fn record_sample(&self, sample: &MetricSample) {
        let Some(series) = self.series(&sample.route) else {
            return;
        };

        let timed =
            TimedSample { at: self.clock.now(), status: sample.status, latency_ms: sample.latency_ms };

        let mut samples = match series.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.push_back(timed);

        // Batched lazy eviction: amortize the scan instead of paying it on
        // every write.
        let writes = series.writes_since_eviction.fetch_add(1, Ordering::Relaxed) + 1;
        if writes >= self.config.eviction_stride
            || samples.len() > self.config.max_samples_per_route
        {
            series.writes_since_eviction.store(0, Ordering::Relaxed);
            self.evict(&mut samples);
        }
    }

    /// Compute a rolling-window snapshot for a route.
    ///
    /// A route with no retained samples in the window (or no collection at
    /// all) yields the defined empty sentinel, never an error or NaN.
    pub fn snapshot(&self, route: &str, window: Duration) -> MetricSnapshot {
        let window_start =
            self.clock.timestamp() - chrono::Duration::from_std(window).unwrap_or_default();

        let Some(series) = self.series(route) else {
            return MetricSnapshot::empty(window_start);
        };

        let cutoff = self.clock.now().checked_sub(window);
        let samples = match series.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut successes = 0usize;
        let mut errors = 0usize;
        let mut latency_sum = 0.0f64;
        for sample in samples.iter() {
            if let Some(cutoff) = cutoff {
                if sample.at < cutoff {
                    continue;
                }
            }
            match sample.status {
                StatusClass::Success => successes += 1,
                StatusClass::Error => errors += 1,
            }
            latency_sum += sample.latency_ms;
        }
        drop(samples);

        let total = successes + errors;
        if total == 0 {
            return MetricSnapshot::empty(window_start);
        }

        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        MetricSnapshot {
            success_rate: successes as f64 / total as f64,
            error_rate: errors as f64 / total as f64,
            avg_latency_ms: latency_sum / total as f64,
            throughput_per_sec: total as f64 / window_secs,
            sample_size: total,
            window_start,
        }
    }

    /// Store a baseline snapshot for a route.
    pub fn set_baseline(&self, route: &str, snapshot: MetricSnapshot) {
        if let Some(series) = self.series(route) {
            let mut baseline = match series.baseline.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *baseline = Some(snapshot);
        } else {
            warn!(route, "baseline set for route without active collection");
        }
    }

    /// The stored baseline for a route, if one was captured.
    pub fn baseline(&self, route: &str) -> Option<MetricSnapshot> {
        let series = self.series(route)?;
        let baseline = match series.baseline.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        baseline.clone()
    }

    /// Snapshot the route now and retain it as the baseline.
    ///
    /// Called once per deployment shortly after monitoring starts; the
    /// baseline lives until collection stops.
    pub fn capture_baseline(&self, route: &str, window: Duration) -> MetricSnapshot {
        let snapshot = self.snapshot(route, window);
        self.set_baseline(route, snapshot.clone());
        snapshot
    }

    /// Compare a snapshot against the route's baseline.
    ///
    /// Returns `None` when no baseline exists or the baseline window was
    /// empty (a comparison against nothing is meaningless).
    pub fn compare_to_baseline(
        &self,
        route: &str,
        current: &MetricSnapshot,
    ) -> Option<BaselineComparison> {
        let baseline = self.baseline(route)?;
        if baseline.is_empty() {
            return None;
        }
        Some(BaselineComparison::between(&baseline, current))
    }

    /// Evaluate a route's current window against thresholds.
    pub fn check_health(
        &self,
        route: &str,
        window: Duration,
        thresholds: &HealthThresholds,
    ) -> HealthReport {
        let snapshot = self.snapshot(route, window);
        HealthReport::evaluate(&snapshot, thresholds)
    }

    fn series(&self, route: &str) -> Option<Arc<RouteSeries>> {
        self.read_routes().get(route).cloned()
    }

    fn read_routes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RouteSeries>>> {
        match self.routes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop samples past the retention window, then trim to the hard cap.
    fn evict(&self, samples: &mut VecDeque<TimedSample>) {
        if let Some(cutoff) = self.clock.now().checked_sub(self.config.retention) {
            while samples.front().map(|s| s.at < cutoff).unwrap_or(false) {
                samples.pop_front();
            }
        }
        while samples.len() > self.config.max_samples_per_route {
            samples.pop_front();
        }
    }
}
