//! Reject-on-full concurrency capping
//!
//! A [`CapacityGate`] bounds how many of something may exist at once. Unlike
//! a queueing bulkhead, an acquisition attempt against a full gate fails
//! immediately; the caller decides whether to retry later or give up. The
//! permit releases its slot on drop, so holders cannot leak capacity on any
//! exit path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Metrics snapshot for a capacity gate.
#[derive(Debug, Clone)]
pub struct CapacityMetrics {
    /// Maximum number of concurrent holders.
    pub capacity: usize,
    /// Permits currently held.
    pub in_use: usize,
    /// Total successful acquisitions.
    pub granted: u64,
    /// Total refused acquisitions.
    pub rejected: u64,
}

impl CapacityMetrics {
    /// Current utilization as a fraction (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.in_use as f64 / self.capacity as f64
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.in_use >= self.capacity
    }
}

/// A held capacity slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct CapacityPermit {
    _permit: OwnedSemaphorePermit,
}

/// Concurrency cap with immediate-rejection semantics.
pub struct CapacityGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    granted: AtomicU64,
    rejected: AtomicU64,
}

impl CapacityGate {
    /// Create a gate allowing up to `capacity` concurrent holders.
    ///
    /// A zero capacity is clamped to 1; a gate that can never grant a permit
    /// is a misconfiguration, not a policy.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            granted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Try to take a slot without waiting.
    ///
    /// Returns `None` when the gate is full. Nothing is ever queued.
    pub fn try_acquire(&self) -> Option<CapacityPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.granted.fetch_add(1, Ordering::Relaxed);
                Some(CapacityPermit { _permit: permit })
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(capacity = self.capacity, "capacity gate refused acquisition");
                None
            }
        }
    }

    /// Maximum number of concurrent holders.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Slots still available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Snapshot of gate metrics.
    pub fn metrics(&self) -> CapacityMetrics {
        CapacityMetrics {
            capacity: self.capacity,
            in_use: self.in_use(),
            granted: self.granted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}

impl fmt::Debug for CapacityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityGate")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates a fresh gate grants permits up to its capacity.
    #[test]
    fn test_gate_grants_up_to_capacity() {
        let gate = CapacityGate::new(2);

        let first = gate.try_acquire();
        let second = gate.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(gate.in_use(), 2);

        // Full: third attempt is refused, not queued
        assert!(gate.try_acquire().is_none());
    }

    /// Validates dropping a permit frees its slot for reuse.
    #[test]
    fn test_gate_releases_on_drop() {
        let gate = CapacityGate::new(1);

        let permit = gate.try_acquire();
        assert!(permit.is_some());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert_eq!(gate.in_use(), 0);
        assert!(gate.try_acquire().is_some());
    }

    /// Validates grant/reject counters in the metrics snapshot.
    ///
    /// Assertions:
    /// - Confirms `granted` equals `1` and `rejected` equals `2`.
    /// - Ensures `is_full()` evaluates to true while the permit is held.
    #[test]
    fn test_gate_metrics() {
        let gate = CapacityGate::new(1);

        let _held = gate.try_acquire();
        let _ = gate.try_acquire();
        let _ = gate.try_acquire();

        let metrics = gate.metrics();
        assert_eq!(metrics.granted, 1);
        assert_eq!(metrics.rejected, 2);
        assert_eq!(metrics.in_use, 1);
        assert!(metrics.is_full());
        assert_eq!(metrics.utilization(), 1.0);
    }

    /// Validates zero capacity is clamped rather than creating a dead gate.
    #[test]
    fn test_gate_zero_capacity_clamped() {
        let gate = CapacityGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert!(gate.try_acquire().is_some());
    }
}
