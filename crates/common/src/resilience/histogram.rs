//! Latency distribution tracking
//!
//! Lock-free histogram over logarithmic buckets, sized for request-handler
//! invocations (1µs to 10 minutes). Recording is a handful of atomic adds,
//! cheap enough for the request hot path; percentile math happens only when
//! a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Histogram of operation latencies.
///
/// Clones share the same underlying buckets, so a histogram embedded in a
/// record and the copy handed to a stats reader observe the same data.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Arc<[AtomicU64; Self::NUM_BUCKETS]>,
    count: Arc<AtomicU64>,
    sum_micros: Arc<AtomicU64>,
    max_micros: Arc<AtomicU64>,
}

impl LatencyHistogram {
    /// Bucket count covering 1µs to 10 minutes with logarithmic spacing.
    const NUM_BUCKETS: usize = 40;
    const MIN_MICROS: u64 = 1;
    const MAX_MICROS: u64 = 600_000_000; // 10 minutes

    /// Create an empty histogram.
    pub fn new() -> Self {
        let buckets: [AtomicU64; Self::NUM_BUCKETS] = std::array::from_fn(|_| AtomicU64::new(0));
        Self {
            buckets: Arc::new(buckets),
            count: Arc::new(AtomicU64::new(0)),
            sum_micros: Arc::new(AtomicU64::new(0)),
            max_micros: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one measurement.
    pub fn record(&self, duration: Duration) {
        let micros = duration.as_micros().min(Self::MAX_MICROS as u128) as u64;
        let bucket = Self::bucket_index(micros);

        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);

        let mut current_max = self.max_micros.load(Ordering::Acquire);
        while micros > current_max {
            match self.max_micros.compare_exchange_weak(
                current_max,
                micros,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current_max = actual,
            }
        }
    }

    /// Record the elapsed time since `start`.
    pub fn record_since(&self, start: Instant) {
        self.record(start.elapsed());
    }

    /// Number of recorded measurements.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Take an immutable snapshot of the current distribution.
    pub fn snapshot(&self) -> LatencySnapshot {
        let mut buckets = [0u64; Self::NUM_BUCKETS];
        for (slot, bucket) in buckets.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.load(Ordering::Acquire);
        }

        LatencySnapshot {
            buckets,
            count: self.count.load(Ordering::Acquire),
            sum_micros: self.sum_micros.load(Ordering::Acquire),
            max_micros: self.max_micros.load(Ordering::Acquire),
        }
    }

    fn bucket_index(micros: u64) -> usize {
        if micros <= Self::MIN_MICROS {
            return 0;
        }
        let clamped = micros.clamp(Self::MIN_MICROS, Self::MAX_MICROS);
        let ratio_ln = Self::bucket_ratio().ln();
        let bucket = ((clamped as f64 / Self::MIN_MICROS as f64).ln() / ratio_ln).floor() as usize;
        bucket.min(Self::NUM_BUCKETS - 1)
    }

    fn bucket_midpoint_micros(bucket: usize) -> u64 {
        if bucket == 0 {
            return Self::MIN_MICROS;
        }
        let value = (Self::MIN_MICROS as f64) * Self::bucket_ratio().powf(bucket as f64 + 0.5);
        value.round() as u64
    }

    fn bucket_ratio() -> f64 {
        static RATIO: OnceLock<f64> = OnceLock::new();
        *RATIO.get_or_init(|| {
            (Self::MAX_MICROS as f64 / Self::MIN_MICROS as f64)
                .powf(1.0 / (Self::NUM_BUCKETS as f64 - 1.0))
        })
    }
}

impl Clone for LatencyHistogram {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
            count: Arc::clone(&self.count),
            sum_micros: Arc::clone(&self.sum_micros),
            max_micros: Arc::clone(&self.max_micros),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of a histogram at one point in time.
#[derive(Debug, Clone)]
pub struct LatencySnapshot {
    buckets: [u64; LatencyHistogram::NUM_BUCKETS],
    count: u64,
    sum_micros: u64,
    max_micros: u64,
}

impl LatencySnapshot {
    /// Total number of measurements.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean latency, or `None` for an empty snapshot.
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(Duration::from_micros(self.sum_micros / self.count))
    }

    /// Maximum recorded latency, or `None` for an empty snapshot.
    pub fn max(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(Duration::from_micros(self.max_micros))
    }

    /// Latency at the given rank (0.0 to 1.0), or `None` for an empty
    /// snapshot or out-of-range rank.
    ///
    /// The returned value is the midpoint of the bucket containing the rank,
    /// so precision is bounded by the logarithmic bucket width.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.count == 0 || !(0.0..=1.0).contains(&p) {
            return None;
        }

        let rank = if p >= 1.0 {
            self.count - 1
        } else {
            ((self.count as f64 - 1.0) * p).ceil().max(0.0) as u64
        };

        let mut accumulated = 0u64;
        for (bucket_idx, &bucket_count) in self.buckets.iter().enumerate() {
            accumulated += bucket_count;
            if accumulated > rank {
                let micros = LatencyHistogram::bucket_midpoint_micros(bucket_idx);
                return Some(Duration::from_micros(micros));
            }
        }

        self.max()
    }

    /// The p50/p95/p99 triple most dashboards want.
    pub fn percentiles(&self) -> LatencyPercentiles {
        LatencyPercentiles {
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

/// Common percentile values.
#[derive(Debug, Clone)]
pub struct LatencyPercentiles {
    pub p50: Option<Duration>,
    pub p95: Option<Duration>,
    pub p99: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates basic record/snapshot round trip.
    #[test]
    fn test_histogram_basic() {
        let histogram = LatencyHistogram::new();

        histogram.record(Duration::from_millis(10));
        histogram.record(Duration::from_millis(20));
        histogram.record(Duration::from_millis(30));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count(), 3);

        let mean = snapshot.mean().unwrap();
        assert!(mean >= Duration::from_millis(15) && mean <= Duration::from_millis(25));
    }

    /// Validates percentile estimates land in the right region of the
    /// distribution.
    #[test]
    fn test_histogram_percentiles() {
        let histogram = LatencyHistogram::new();
        for i in 1..=100 {
            histogram.record(Duration::from_millis(i));
        }

        let snapshot = histogram.snapshot();
        let p50 = snapshot.percentile(0.5).unwrap();
        assert!(p50 >= Duration::from_millis(30) && p50 <= Duration::from_millis(80));

        let p99 = snapshot.percentile(0.99).unwrap();
        assert!(p99 >= Duration::from_millis(80));
    }

    /// Validates the empty snapshot returns `None` everywhere instead of
    /// dividing by zero.
    #[test]
    fn test_empty_histogram() {
        let snapshot = LatencyHistogram::new().snapshot();

        assert_eq!(snapshot.count(), 0);
        assert_eq!(snapshot.mean(), None);
        assert_eq!(snapshot.max(), None);
        assert_eq!(snapshot.percentile(0.5), None);
    }

    /// Validates clones share buckets with the original.
    #[test]
    fn test_histogram_clone_shares_data() {
        let histogram_a = LatencyHistogram::new();
        histogram_a.record(Duration::from_millis(5));

        let histogram_b = histogram_a.clone();
        histogram_b.record(Duration::from_millis(7));

        assert_eq!(histogram_a.count(), 2);
        assert_eq!(histogram_b.count(), 2);
    }

    /// Validates durations beyond the bucket range are clamped, not lost.
    #[test]
    fn test_histogram_clamps_outliers() {
        let histogram = LatencyHistogram::new();
        histogram.record(Duration::from_secs(3_600));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count(), 1);
        assert_eq!(snapshot.max(), Some(Duration::from_secs(600)));
    }

    /// Validates `record_since` measures elapsed wall time.
    #[test]
    fn test_record_since() {
        let histogram = LatencyHistogram::new();
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        histogram.record_since(start);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count(), 1);
        assert!(snapshot.max().unwrap() >= Duration::from_millis(5));
    }
}
