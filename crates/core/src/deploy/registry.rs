//! Explicit registry of deployments
//!
//! All deployment state lives behind this registry object; there is no
//! ambient or static map anywhere in the engine. Each deployment gets a
//! handle owning its status (behind its own lock, so the stage loop and the
//! rollback monitor serialize their writes), its cancellation token, and
//! the capacity slot it occupies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use canopy_common::resilience::CapacityPermit;
use canopy_domain::{DeploymentPlan, DeploymentStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-deployment shared state.
///
/// The status lock is the single synchronization point for the deployment's
/// state machine: the stage loop, the rollback monitor, and emergency paths
/// all mutate status under it, so concurrent writers cannot race a
/// transition.
pub struct DeploymentHandle {
    pub id: Uuid,
    pub route: String,
    pub injection_id: Uuid,
    pub plan: DeploymentPlan,
    pub status: tokio::sync::RwLock<DeploymentStatus>,
    pub cancel: CancellationToken,
    permit: Mutex<Option<CapacityPermit>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeploymentHandle {
    /// Create a handle holding the deployment's capacity slot.
    pub fn new(
        route: impl Into<String>,
        injection_id: Uuid,
        plan: DeploymentPlan,
        status: DeploymentStatus,
        permit: CapacityPermit,
    ) -> Self {
        Self {
            id: status.id,
            route: route.into(),
            injection_id,
            plan,
            status: tokio::sync::RwLock::new(status),
            cancel: CancellationToken::new(),
            permit: Mutex::new(Some(permit)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Clone of the current status.
    pub async fn status_snapshot(&self) -> DeploymentStatus {
        self.status.read().await.clone()
    }

    /// Free the deployment's concurrency slot. Idempotent.
    pub fn release_slot(&self) {
        if let Ok(mut permit) = self.permit.lock() {
            permit.take();
        }
    }

    /// Track a background task belonging to this deployment.
    pub fn track_task(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    /// Await every background task spawned for this deployment.
    ///
    /// Used by tests and orderly shutdown; the tasks exit on their own once
    /// the deployment reaches a terminal state or its token is cancelled.
    pub async fn await_tasks(&self) {
        let drained = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        };
        for task in drained {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for DeploymentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentHandle")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("injection_id", &self.injection_id)
            .finish()
    }
}

/// Synchronized map of all deployments, terminal ones included.
///
/// Terminal deployments stay queryable; their concurrency slot is released
/// separately, so retention costs nothing but memory for the status.
#[derive(Default)]
pub struct DeploymentRegistry {
    deployments: RwLock<HashMap<Uuid, Arc<DeploymentHandle>>>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment handle.
    pub fn insert(&self, handle: Arc<DeploymentHandle>) {
        let mut deployments = match self.deployments.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deployments.insert(handle.id, handle);
    }

    /// Look up a deployment handle.
    pub fn get(&self, id: Uuid) -> Option<Arc<DeploymentHandle>> {
        self.read().get(&id).cloned()
    }

    /// Clone of a deployment's status, if it exists.
    pub async fn status(&self, id: Uuid) -> Option<DeploymentStatus> {
        let handle = self.get(id)?;
        Some(handle.status_snapshot().await)
    }

    /// Handles of deployments not yet in a terminal state.
    pub async fn active(&self) -> Vec<Arc<DeploymentHandle>> {
        let handles: Vec<_> = self.read().values().cloned().collect();
        let mut active = Vec::new();
        for handle in handles {
            if !handle.status.read().await.state.is_terminal() {
                active.push(handle);
            }
        }
        active
    }

    /// Status snapshots of all non-terminal deployments.
    pub async fn active_statuses(&self) -> Vec<DeploymentStatus> {
        let mut statuses = Vec::new();
        for handle in self.active().await {
            statuses.push(handle.status_snapshot().await);
        }
        statuses
    }

    /// Number of registered deployments, terminal ones included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry has no deployments at all.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<DeploymentHandle>>> {
        match self.deployments.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for DeploymentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentRegistry").field("len", &self.len()).finish()
    }
}
