//! Automatic and manual rollback paths.

mod support;

use std::sync::Arc;
use std::time::Duration;

use canopy_core::CanopyEngine;
use canopy_domain::{
    DeploymentState, HandlerPatch, RollbackInitiator, RollbackStrategy, StatusClass,
};
use support::{fast_config, fast_plan, feed_samples, ok_handler, RecordingRouter, RouterCall};

/// A severe error rate mid-stage aborts the deployment: state ends Failed,
/// traffic drops to zero, the split is cleared, and the patch is disabled.
#[tokio::test]
async fn unhealthy_stage_rolls_back() {
    let router = Arc::new(RecordingRouter::new());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    // Long stages: the deployment can only end via rollback
    let plan = fast_plan(patch.id, &[10, 100], 10_000, 20);

    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();
    feed_samples(engine.collector(), "/api/orders", 30, StatusClass::Error, 50.0);

    let handle = engine.registry().get(id).unwrap();
    handle.await_tasks().await;

    let status = engine.deployer().deployment_status(id).await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.traffic_percentage, 0);

    // The split was withdrawn and the patch disabled
    assert_eq!(router.cleared_routes(), vec!["/api/orders".to_string()]);
    assert_eq!(engine.injector().active_count(), 0);

    // Exactly one rollback record despite two concurrent supervisors
    let history = engine.deployer().rollback_history(16);
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].deployment_id, id);
}

/// An error rate that the stage thresholds tolerate but the plan's rollback
/// thresholds do not is caught by the independent monitor through the
/// sustained-violation rule, within one cycle of the third violation.
#[tokio::test]
async fn sustained_violations_preempt_a_tolerant_stage() {
    let router = Arc::new(RecordingRouter::new());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    let mut plan = fast_plan(patch.id, &[10, 100], 10_000, 20);
    // The stage loop tolerates a 30% error rate...
    for stage in &mut plan.stages {
        stage.max_error_rate = 0.5;
        stage.min_success_rate = 0.5;
    }
    // ...but the rollback thresholds do not
    plan.rollback.max_error_rate = 0.05;

    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();
    // 30% errors: violates 0.05 on every poll, never critical (< 0.5)
    feed_samples(engine.collector(), "/api/orders", 70, StatusClass::Success, 50.0);
    feed_samples(engine.collector(), "/api/orders", 30, StatusClass::Error, 50.0);

    let handle = engine.registry().get(id).unwrap();
    // Three monitor polls at 20ms plus slack
    tokio::time::timeout(Duration::from_secs(5), handle.await_tasks())
        .await
        .expect("monitor should have rolled the deployment back");

    let status = engine.deployer().deployment_status(id).await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);

    let history = engine.deployer().rollback_history(16);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].initiator, RollbackInitiator::Automatic);
    assert!(history[0].reason.contains("error_rate"), "reason: {}", history[0].reason);
}

/// Manual rollback drives a healthy deployment down and is idempotent.
#[tokio::test]
async fn manual_rollback_is_idempotent() {
    let router = Arc::new(RecordingRouter::new());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    let plan = fast_plan(patch.id, &[10, 100], 10_000, 20);
    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();
    feed_samples(engine.collector(), "/api/orders", 20, StatusClass::Success, 50.0);

    engine
        .deployer()
        .rollback_deployment(id, RollbackInitiator::Manual, "operator request")
        .await
        .unwrap();

    let handle = engine.registry().get(id).unwrap();
    handle.await_tasks().await;

    let status = engine.deployer().deployment_status(id).await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.traffic_percentage, 0);

    // Rolling back a failed deployment is a no-op, not an error
    engine
        .deployer()
        .rollback_deployment(id, RollbackInitiator::Manual, "again")
        .await
        .unwrap();
    assert_eq!(engine.deployer().rollback_history(16).len(), 1);

    // Unknown deployments are an error, though
    let missing = engine
        .deployer()
        .rollback_deployment(uuid::Uuid::new_v4(), RollbackInitiator::Manual, "nope")
        .await;
    assert!(missing.is_err());
}

/// Gradual rollback steps traffic down before clearing the split.
#[tokio::test]
async fn gradual_rollback_steps_traffic_down() {
    let router = Arc::new(RecordingRouter::new());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    let plan = fast_plan(patch.id, &[50, 100], 10_000, 20);
    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();
    feed_samples(engine.collector(), "/api/orders", 20, StatusClass::Success, 50.0);

    // Let stage 0 apply its 50% split
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine
        .deployer()
        .rollback_deployment_with_strategy(
            id,
            RollbackInitiator::Manual,
            "operator request",
            RollbackStrategy::Gradual { steps: 2 },
        )
        .await
        .unwrap();
    let handle = engine.registry().get(id).unwrap();
    handle.await_tasks().await;

    let calls = router.calls();
    // After the initial raise to 50, the reduction steps downward and the
    // split is cleared at the end
    let raise_idx = calls
        .iter()
        .position(|c| *c == RouterCall::Set("/api/orders".to_string(), 50))
        .expect("stage split should have been applied");
    let after: Vec<_> = calls[raise_idx + 1..].to_vec();
    assert!(after.contains(&RouterCall::Set("/api/orders".to_string(), 25)));
    assert_eq!(after.last(), Some(&RouterCall::Clear("/api/orders".to_string())));

    let history = engine.deployer().rollback_history(16);
    assert_eq!(history[0].strategy, RollbackStrategy::Gradual { steps: 2 });
}

/// A router without gradual support degrades the strategy to immediate.
#[tokio::test]
async fn gradual_degrades_without_router_support() {
    let router = Arc::new(RecordingRouter::without_gradual());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    let plan = fast_plan(patch.id, &[50, 100], 10_000, 20);
    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine
        .deployer()
        .rollback_deployment_with_strategy(
            id,
            RollbackInitiator::Manual,
            "operator request",
            RollbackStrategy::Gradual { steps: 4 },
        )
        .await
        .unwrap();
    engine.registry().get(id).unwrap().await_tasks().await;

    // No intermediate reductions: one raise, then the clear
    assert_eq!(router.set_percentages(), vec![50]);
    assert_eq!(router.cleared_routes(), vec!["/api/orders".to_string()]);
}

/// A router that rejects split changes forces a rollback, and the rollback
/// still drives the deployment to Failed.
#[tokio::test]
async fn rollback_with_failing_router_still_fails_deployment() {
    let router = Arc::new(RecordingRouter::failing());
    let engine = CanopyEngine::new(fast_config(), router.clone()).unwrap();

    let patch = HandlerPatch::new("orders-fix", "/api/orders");
    let plan = fast_plan(patch.id, &[10, 100], 10_000, 20);
    let id = engine
        .deployer()
        .deploy(patch, ok_handler(), Some(plan))
        .await
        .unwrap();

    // The router rejects the first split, which itself forces a rollback;
    // clear_split succeeds, so the rollback completes
    let handle = engine.registry().get(id).unwrap();
    handle.await_tasks().await;

    let status = engine.deployer().deployment_status(id).await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert_eq!(status.traffic_percentage, 0);
    assert_eq!(engine.deployer().rollback_history(16).len(), 1);
}
