//! Default canary plan construction
//!
//! Callers that do not bring their own plan get the conventional ladder:
//! 10% → 50% → 100%, each stage supervised for a fixed duration against the
//! default 95%-success / 5%-error thresholds.

use std::time::Duration;

use canopy_domain::constants::{DEFAULT_STAGE_DURATION, DEFAULT_STAGE_PERCENTAGES};
use canopy_domain::{DeploymentPlan, Stage};
use uuid::Uuid;

/// The default staged ladder for a patch.
pub fn default_plan(patch_id: Uuid) -> DeploymentPlan {
    staged_plan(patch_id, &DEFAULT_STAGE_PERCENTAGES, DEFAULT_STAGE_DURATION)
}

/// A plan walking `percentages` in order, each supervised for `duration`.
pub fn staged_plan(patch_id: Uuid, percentages: &[u8], duration: Duration) -> DeploymentPlan {
    let stages = percentages.iter().map(|&p| Stage::new(p, duration)).collect();
    DeploymentPlan::new(patch_id, stages)
}
