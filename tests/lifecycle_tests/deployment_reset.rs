//! Stories about clearing a group's deployments before the group is removed

use serde_json::json;

use edge_lifecycle::greengrass::{DeploymentKind, DeploymentState};
use edge_lifecycle::protocol::ResponseStatus;

use super::helpers::Harness;

const GROUP: &str = "fleet01";

/// Story: the stack tears down a group whose core is running a deployment
///
/// The reset resource's Delete finishes (reset issued and settled) before
/// the dependent group deletion runs, and that deletion then succeeds.
#[tokio::test]
async fn story_reset_settles_before_group_deletion() {
    let harness = Harness::new();
    let group_id = harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::New);

    assert!(
        harness.greengrass.delete_group(GROUP).is_err(),
        "group with an active deployment must not be deletable"
    );

    let response = harness.reset("Delete", GROUP, json!({})).await;
    assert!(response.is_success(), "{:?}", response.reason);

    harness.greengrass.delete_group(GROUP).unwrap();

    let events = harness.events();
    let reset = events
        .iter()
        .position(|e| *e == format!("reset:{group_id}"))
        .unwrap();
    let settled = events
        .iter()
        .position(|e| e.starts_with("settled:") && e.ends_with(":Success"))
        .unwrap();
    let deleted = events
        .iter()
        .position(|e| *e == format!("delete-group:{GROUP}"))
        .unwrap();
    assert!(reset < settled && settled < deleted, "{events:?}");
}

/// Story: a group that was never deployed is torn down
#[tokio::test]
async fn story_no_deployments_means_no_reset() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));

    let response = harness.reset("Delete", GROUP, json!({})).await;

    assert!(response.is_success());
    assert!(harness.greengrass.deployments(GROUP).is_empty());
    assert!(harness.events().is_empty());
}

/// Story: the group was already deleted out of band
#[tokio::test]
async fn story_missing_group_is_success() {
    let harness = Harness::new();

    let response = harness.reset("Delete", "ghost-group", json!({})).await;

    assert!(response.is_success());
    assert_eq!(harness.sender.count(), 1);
}

/// Story: Delete is redelivered after the reset already happened
#[tokio::test]
async fn story_redelivered_delete_does_not_reset_again() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::New);

    assert!(harness.reset("Delete", GROUP, json!({})).await.is_success());
    assert!(harness.reset("Delete", GROUP, json!({})).await.is_success());

    let resets = harness
        .greengrass
        .deployments(GROUP)
        .iter()
        .filter(|d| d.kind.is_reset())
        .count();
    assert_eq!(resets, 1);
}

/// Story: the first reset failed and the orchestrator retries Delete
///
/// The group stays undeletable after the failure. The retry issues a fresh
/// reset and only succeeds once that one settles.
#[tokio::test]
async fn story_retried_delete_after_failed_reset_resets_again() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::New);
    harness
        .greengrass
        .set_reset_progression(vec![DeploymentState::Failure]);

    let first = harness.reset("Delete", GROUP, json!({})).await;
    assert_eq!(first.status, ResponseStatus::Failed);
    assert!(harness.greengrass.delete_group(GROUP).is_err());

    harness.greengrass.set_reset_progression(vec![
        DeploymentState::InProgress,
        DeploymentState::Success,
    ]);
    let retried = harness.reset("Delete", GROUP, json!({})).await;

    assert!(retried.is_success(), "{:?}", retried.reason);
    let resets = harness
        .greengrass
        .deployments(GROUP)
        .iter()
        .filter(|d| d.kind.is_reset())
        .count();
    assert_eq!(resets, 2);
    harness.greengrass.delete_group(GROUP).unwrap();
}

/// Story: the first reset was still settling when Delete gave up
///
/// A retry while it is still settling fails again without piling up resets;
/// once it settles the next retry succeeds without issuing another.
#[tokio::test]
async fn story_retried_delete_waits_for_unsettled_reset() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::New);
    harness
        .greengrass
        .set_reset_progression(vec![DeploymentState::InProgress]);

    let first = harness.reset("Delete", GROUP, json!({})).await;
    assert_eq!(first.status, ResponseStatus::Failed);
    assert!(harness.greengrass.delete_group(GROUP).is_err());

    let still_settling = harness.reset("Delete", GROUP, json!({})).await;
    assert_eq!(still_settling.status, ResponseStatus::Failed);
    assert!(still_settling.reason.unwrap().contains("did not settle"));

    harness.greengrass.settle_resets(DeploymentState::Success);
    let retried = harness.reset("Delete", GROUP, json!({})).await;

    assert!(retried.is_success(), "{:?}", retried.reason);
    let resets = harness
        .greengrass
        .deployments(GROUP)
        .iter()
        .filter(|d| d.kind.is_reset())
        .count();
    assert_eq!(resets, 1);
    harness.greengrass.delete_group(GROUP).unwrap();
}

/// Story: the core rejects the reset
#[tokio::test]
async fn story_failed_reset_fails_the_delete() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::Redeployment);
    harness
        .greengrass
        .set_reset_progression(vec![DeploymentState::InProgress, DeploymentState::Failure]);

    let response = harness.reset("Delete", GROUP, json!({})).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.unwrap().contains("failed"));
}

/// Story: the reset never settles within the poll budget
#[tokio::test]
async fn story_stuck_reset_times_out_as_failure() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));
    harness.greengrass.add_deployment(GROUP, DeploymentKind::New);
    harness
        .greengrass
        .set_reset_progression(vec![DeploymentState::InProgress]);

    let response = harness.reset("Delete", GROUP, json!({})).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.unwrap().contains("did not settle"));
    assert_eq!(harness.sender.count(), 1);
}

/// Story: Create and Update of the reset resource change nothing
#[tokio::test]
async fn story_create_and_update_are_no_ops() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v1"));

    let created = harness.reset("Create", GROUP, json!({})).await;
    let updated = harness.reset("Update", GROUP, json!({})).await;

    assert!(created.is_success());
    assert!(updated.is_success());
    assert!(created.data.is_empty());
    assert!(harness.greengrass.deployments(GROUP).is_empty());
}

/// Story: the template asks for the group to be deployed on creation
#[tokio::test]
async fn story_deploy_on_create_pushes_latest_version() {
    let harness = Harness::new();
    harness.greengrass.add_group(GROUP, Some("v7"));

    let response = harness
        .reset("Create", GROUP, json!({ "DeployOnCreate": "true" }))
        .await;

    assert!(response.is_success(), "{:?}", response.reason);
    let deployments = harness.greengrass.deployments(GROUP);
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].kind, DeploymentKind::New);
}
