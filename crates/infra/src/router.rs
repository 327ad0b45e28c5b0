//! Probabilistic traffic splitting
//!
//! The split for a route is realized as an independent Bernoulli draw per
//! request: a route at 30% sends each incoming request to the canary lane
//! with probability 0.30, with no memory between requests. A single client
//! can therefore see both behaviours across consecutive requests during a
//! canary. This is a deliberate configuration choice, not an accident —
//! per-request independence keeps the router stateless and the sample
//! stream unbiased; hosts that need client affinity can substitute a
//! consistent-hashing-by-client-id implementation of the same port.

use async_trait::async_trait;
use canopy_core::ports::TrafficRouter;
use canopy_domain::Result;
use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use crate::errors::InfraError;

/// Which lane a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// The pre-patch handler.
    Stable,
    /// The patched handler.
    Canary,
}

/// In-process implementation of the `TrafficRouter` port.
#[derive(Debug, Default)]
pub struct SplitRouter {
    splits: DashMap<String, u8>,
}

impl SplitRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current split for a route; absent means all-stable.
    pub fn split(&self, route: &str) -> Option<u8> {
        self.splits.get(route).map(|entry| *entry)
    }

    /// Select the lane for one request with a fresh independent draw.
    pub fn lane(&self, route: &str) -> Lane {
        let Some(percentage) = self.split(route) else {
            return Lane::Stable;
        };
        Self::lane_for_draw(percentage, rand::thread_rng().gen_range(0..100))
    }

    /// Deterministic core of the lane decision: `draw` is uniform in 0..100.
    fn lane_for_draw(percentage: u8, draw: u8) -> Lane {
        if draw < percentage {
            Lane::Canary
        } else {
            Lane::Stable
        }
    }
}

#[async_trait]
impl TrafficRouter for SplitRouter {
    async fn set_split(&self, route: &str, percentage: u8) -> Result<()> {
        if percentage > 100 {
            return Err(InfraError::router(format!(
                "split {percentage}% out of range for route {route}"
            ))
            .into());
        }
        debug!(route, percentage, "traffic split updated");
        self.splits.insert(route.to_string(), percentage);
        Ok(())
    }

    async fn clear_split(&self, route: &str) -> Result<()> {
        self.splits.remove(route);
        debug!(route, "traffic split cleared");
        Ok(())
    }

    fn supports_gradual(&self) -> bool {
        true
    }
}
