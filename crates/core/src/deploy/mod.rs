//! Canary deployment state machine and supervision

pub mod deployer;
pub mod planner;
pub mod registry;

pub use deployer::CanaryDeployer;
pub use registry::{DeploymentHandle, DeploymentRegistry};
