//! Stories about envelopes that never reach a handler

use serde_json::json;

use edge_lifecycle::protocol::ResponseStatus;

use super::helpers::{Harness, RESPONSE_URL, STACK_ID};

/// Story: the envelope is missing required fields but still names its callback
#[tokio::test]
async fn story_truncated_envelope_gets_one_failed_response() {
    let harness = Harness::new();

    let response = harness
        .send(json!({
            "RequestType": "Create",
            "ResponseURL": RESPONSE_URL,
            "StackId": STACK_ID,
            "RequestId": "req-truncated",
            "LogicalResourceId": "CoreIdentity"
        }))
        .await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.request_id, "req-truncated");
    assert!(!response.physical_resource_id.is_empty());
    assert!(harness.iot.is_empty());

    let delivered = harness.sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, RESPONSE_URL);
}

/// Story: a resource type nobody registered
#[tokio::test]
async fn story_unknown_resource_type_fails() {
    let harness = Harness::new();
    let envelope = harness.envelope(
        "Delete",
        "Custom::SomethingElse",
        "Mystery",
        json!({}),
        Some("existing-id"),
        None,
    );

    let response = harness.send(envelope).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(response.physical_resource_id, "existing-id");
    assert!(response.reason.unwrap().contains("Custom::SomethingElse"));
    assert_eq!(harness.sender.count(), 1);
}

/// Story: something that is not an envelope at all
#[tokio::test]
async fn story_envelope_without_callback_is_logged_only() {
    let harness = Harness::new();

    let response = harness.send(json!(["not", "an", "object"])).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert_eq!(harness.sender.count(), 0);
}
