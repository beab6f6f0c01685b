//! Rollback integration tests

mod common;

use uuid::Uuid;

use common::{TestApp, COMMIT_HASH};
use flowdeck::deploy::orchestrator::DeployOptions;
use flowdeck::errors::EngineError;
use flowdeck::models::deployment::{Deployment, DeploymentStatus, DeploymentTrigger};

#[tokio::test]
async fn test_rollback_opens_a_new_deployment_and_keeps_the_target() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;
    app.create_checkout(&project);

    let target = app
        .state
        .orchestrator
        .deploy(&project, DeployOptions::default())
        .await
        .unwrap();
    let before = serde_json::to_value(app.state.lifecycle.get(target.id).unwrap()).unwrap();
    app.runner.reset();

    let rollback = app
        .state
        .orchestrator
        .rollback(&project, target.id, Some("ops".to_string()))
        .await
        .unwrap();

    assert_ne!(rollback.id, target.id);
    assert_eq!(rollback.status, DeploymentStatus::RolledBack);
    assert_eq!(rollback.trigger, DeploymentTrigger::Rollback);
    assert_eq!(rollback.rollback_deployment_id, Some(target.id));
    assert_eq!(rollback.commit_hash.as_deref(), Some(COMMIT_HASH));
    assert_eq!(rollback.user_id.as_deref(), Some("ops"));
    assert!(rollback.environment_snapshot.is_some());

    let checkout = app
        .runner
        .position(&format!("git checkout --force {}", COMMIT_HASH))
        .unwrap();
    let build = app.runner.position("docker build").unwrap();
    let run = app.runner.position("docker run").unwrap();
    assert!(checkout < build && build < run);

    let after = serde_json::to_value(app.state.lifecycle.get(target.id).unwrap()).unwrap();
    assert_eq!(before, after);

    // A rolled back deployment is itself a valid rollback point
    let points = app.state.orchestrator.rollback_points(&project, 10);
    assert_eq!(points.len(), 2);
}

#[tokio::test]
async fn test_rollback_rejects_invalid_targets() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;
    let other = app.add_project("blog").await;
    app.create_checkout(&project);

    let assert_invalid = |result: Result<Deployment, EngineError>| match result {
        Err(EngineError::RollbackTargetInvalid { .. }) => {}
        other => panic!("expected an invalid target, got {other:?}"),
    };

    assert_invalid(
        app.state
            .orchestrator
            .rollback(&project, Uuid::new_v4(), None)
            .await,
    );

    let foreign = app
        .state
        .orchestrator
        .deploy(&other, DeployOptions::default())
        .await
        .unwrap();
    assert_invalid(app.state.orchestrator.rollback(&project, foreign.id, None).await);

    app.runner.fail_on("docker build", 1);
    let failed = app
        .state
        .orchestrator
        .deploy(&project, DeployOptions::default())
        .await
        .unwrap_err();
    let EngineError::DeploymentFailed { deployment_id, .. } = failed else {
        panic!("expected a failed deployment");
    };
    assert_invalid(app.state.orchestrator.rollback(&project, deployment_id, None).await);

    // Refused targets never open a deployment
    assert_eq!(app.state.orchestrator.deployments(&project).len(), 1);
    let err = app
        .state
        .orchestrator
        .rollback(&project, deployment_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 8);
}
