//! Stories about a device identity's life: provisioning, policy changes,
//! teardown, and redelivered requests.

use edge_lifecycle::identity::PhysicalId;
use edge_lifecycle::protocol::ResponseStatus;
use edge_lifecycle::secrets::SecretStore;
use edge_lifecycle::Error;

use super::fakes::ENDPOINT;
use super::helpers::{open_policy, publish_only_policy, Harness, RESPONSE_URL};

const THING: &str = "fleet01_core";
const POLICY: &str = "fleet01_core-policy";

/// Story: a fleet template provisions the identity for its first core
///
/// The response carries everything the core needs to connect, the private
/// key is masked, and the same credentials are waiting in the secret store.
#[tokio::test]
async fn story_create_provisions_a_complete_identity() {
    let harness = Harness::new();

    let response = harness.create_identity(THING, &open_policy()).await;

    assert_eq!(response.status, ResponseStatus::Success, "{:?}", response.reason);
    assert_eq!(
        response.physical_resource_id,
        PhysicalId::derive(THING).to_string()
    );
    assert!(response.no_echo);
    for key in [
        "thingArn",
        "certificateArn",
        "certificateId",
        "certificatePem",
        "privateKeyPem",
        "endpointAddress",
        "policyName",
    ] {
        assert!(
            !response.data.get(key).map_or(true, String::is_empty),
            "{key} missing from response data"
        );
    }
    assert_eq!(response.data["endpointAddress"], ENDPOINT);
    assert_eq!(response.data["policyName"], POLICY);

    assert!(harness.iot.thing_exists(THING));
    assert!(harness.iot.policy_exists(POLICY));
    assert_eq!(harness.iot.certificate_count(), 1);

    let record = harness.secrets.get(THING).await.unwrap();
    assert_eq!(record.name, THING);
    let stored = harness.secrets.json(THING).unwrap();
    assert_eq!(stored["privateKeyPem"], response.data["privateKeyPem"].as_str());
    assert_eq!(stored["certificateArn"], response.data["certificateArn"].as_str());
    assert_eq!(stored["endpointAddress"], ENDPOINT);

    let delivered = harness.sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, RESPONSE_URL);
    assert_eq!(delivered[0].1, response);
}

/// Story: the stack is deleted and every trace of the identity goes with it
#[tokio::test]
async fn story_delete_removes_identity_and_secret() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;
    assert!(created.is_success());

    let deleted = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;

    assert!(deleted.is_success(), "{:?}", deleted.reason);
    assert_eq!(deleted.physical_resource_id, created.physical_resource_id);
    assert!(deleted.data.is_empty());
    assert!(harness.iot.is_empty());
    assert!(matches!(
        harness.secrets.get(THING).await,
        Err(Error::NotFound(_))
    ));
}

/// Story: the orchestrator redelivers Delete after the first one finished
#[tokio::test]
async fn story_delete_twice_succeeds_twice() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;

    let first = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;
    let second = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;

    assert!(first.is_success());
    assert!(second.is_success(), "{:?}", second.reason);
    assert_eq!(harness.sender.count(), 3);
}

/// Story: a core is decommissioned and later provisioned again under the same name
#[tokio::test]
async fn story_create_after_delete_issues_fresh_credentials() {
    let harness = Harness::new();
    let first = harness.create_identity(THING, &open_policy()).await;
    harness
        .delete_identity(THING, &first.physical_resource_id)
        .await;

    let second = harness.create_identity(THING, &open_policy()).await;

    assert!(second.is_success(), "{:?}", second.reason);
    assert_eq!(second.physical_resource_id, first.physical_resource_id);
    assert_ne!(second.data["certificateArn"], first.data["certificateArn"]);
    assert_ne!(second.data["privateKeyPem"], first.data["privateKeyPem"]);
    assert_eq!(harness.iot.certificate_count(), 1);
}

/// Story: the private key leaves the controller exactly once
///
/// Update changes the policy and reports the identity again, but never the
/// key, and does not mask its output.
#[tokio::test]
async fn story_private_key_only_in_create_response() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;

    let updated = harness
        .update_identity(
            THING,
            &created.physical_resource_id,
            &open_policy(),
            &publish_only_policy(),
        )
        .await;

    assert!(updated.is_success(), "{:?}", updated.reason);
    assert!(!updated.data.contains_key("privateKeyPem"));
    assert!(!updated.no_echo);
    assert_eq!(updated.data["certificateArn"], created.data["certificateArn"]);
    assert_eq!(updated.physical_resource_id, created.physical_resource_id);

    let with_key = harness
        .sender
        .delivered()
        .iter()
        .filter(|(_, r)| r.data.contains_key("privateKeyPem"))
        .count();
    assert_eq!(with_key, 1);
}

/// Story: operators tighten and loosen the policy many times
///
/// The policy never exceeds its version limit and the newest document is
/// always the one in force.
#[tokio::test]
async fn story_repeated_policy_updates_stay_within_version_limit() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;

    let mut previous = open_policy();
    for i in 0..7 {
        let next = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{"Effect": "Allow", "Action": ["iot:Publish"], "Resource": [format!("topic/{i}")]}]
        });
        let response = harness
            .update_identity(THING, &created.physical_resource_id, &previous, &next)
            .await;
        assert!(response.is_success(), "update {i}: {:?}", response.reason);
        previous = next;
    }

    assert!(harness.iot.policy_version_count(POLICY) <= 5);
    let current = harness.iot.default_policy_document(POLICY).unwrap();
    assert!(current.contains("topic/6"));

    let deleted = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;
    assert!(deleted.is_success(), "{:?}", deleted.reason);
    assert!(harness.iot.is_empty());
}

/// Story: an update that only reformats the policy changes nothing
#[tokio::test]
async fn story_reformatted_policy_publishes_no_version() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;

    let reformatted = serde_json::json!({
        "Statement": [{"Resource": ["*"], "Action": ["iot:*", "greengrass:*"], "Effect": "Allow"}],
        "Version": "2012-10-17"
    });
    let response = harness
        .update_identity(
            THING,
            &created.physical_resource_id,
            &open_policy(),
            &reformatted,
        )
        .await;

    assert!(response.is_success());
    assert_eq!(harness.iot.policy_version_count(POLICY), 1);
}

/// Story: Create fails halfway and the stack rolls back
///
/// Nothing is compensated during Create; the rollback's Delete for the same
/// physical id reclaims the thing, the policy, and the unattached
/// certificate.
#[tokio::test]
async fn story_failed_create_is_reclaimed_by_delete() {
    let harness = Harness::new();
    harness.iot.fail_once("AttachThingPrincipal");

    let created = harness.create_identity(THING, &open_policy()).await;
    assert_eq!(created.status, ResponseStatus::Failed);
    assert!(created.reason.as_deref().unwrap().contains("AttachThingPrincipal"));
    assert_eq!(
        created.physical_resource_id,
        PhysicalId::derive(THING).to_string()
    );
    assert!(created.data.is_empty());
    assert!(!created.no_echo);

    assert!(harness.iot.thing_exists(THING));
    assert_eq!(harness.iot.certificate_count(), 1);

    let deleted = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;
    assert!(deleted.is_success(), "{:?}", deleted.reason);
    assert!(harness.iot.is_empty());
}

/// Story: an operator attached a maintenance certificate to the core's thing
///
/// Deleting the identity removes only what it issued. The operator's
/// certificate stays active and keeps its own policy.
#[tokio::test]
async fn story_delete_spares_operator_certificate_and_policy() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;
    assert!(created.is_success());
    let operator = harness
        .iot
        .add_foreign_certificate(THING, "operator", "operator-shared-policy");
    assert_eq!(harness.iot.certificate_count(), 2);

    let deleted = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;

    assert!(deleted.is_success(), "{:?}", deleted.reason);
    assert!(!harness.iot.thing_exists(THING));
    assert!(!harness.iot.policy_exists(POLICY));
    assert_eq!(harness.iot.certificate_count(), 1);
    assert_eq!(harness.iot.certificate_active("operator"), Some(true));
    assert!(harness.iot.policy_exists("operator-shared-policy"));
    assert_eq!(harness.iot.policy_targets("operator-shared-policy"), vec![operator]);
}

/// Story: the control plane throttles during teardown
#[tokio::test]
async fn story_throttled_delete_is_retried_to_completion() {
    let harness = Harness::new();
    let created = harness.create_identity(THING, &open_policy()).await;
    harness.iot.throttle("DeleteCertificate", 2);
    harness.iot.throttle("DeleteThing", 1);

    let deleted = harness
        .delete_identity(THING, &created.physical_resource_id)
        .await;

    assert!(deleted.is_success(), "{:?}", deleted.reason);
    assert!(harness.iot.is_empty());
}

/// Story: the same thing name is claimed by a second logical resource
#[tokio::test]
async fn story_duplicate_thing_name_fails_create() {
    let harness = Harness::new();
    assert!(harness.create_identity(THING, &open_policy()).await.is_success());

    let duplicate = harness.create_identity(THING, &open_policy()).await;

    assert_eq!(duplicate.status, ResponseStatus::Failed);
    assert_eq!(harness.iot.certificate_count(), 1);
}

/// Story: a template author forgets the policy
#[tokio::test]
async fn story_invalid_properties_fail_without_side_effects() {
    let harness = Harness::new();
    let envelope = harness.envelope(
        "Create",
        edge_lifecycle::DEVICE_IDENTITY_RESOURCE_TYPE,
        "CoreIdentity",
        serde_json::json!({ "iotThingName": THING }),
        None,
        None,
    );

    let response = harness.send(envelope).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(response.reason.unwrap().contains("IotPolicy"));
    assert!(harness.iot.is_empty());
    assert_eq!(harness.sender.count(), 1);
}

/// Story: a rollback test sets FailCreate on the identity
#[tokio::test]
async fn story_fail_create_hook_touches_nothing() {
    let harness = Harness::new();
    let mut properties = super::helpers::identity_props(THING, &open_policy());
    properties["FailCreate"] = serde_json::json!("true");
    let envelope = harness.envelope(
        "Create",
        edge_lifecycle::DEVICE_IDENTITY_RESOURCE_TYPE,
        "CoreIdentity",
        properties,
        None,
        None,
    );

    let response = harness.send(envelope).await;

    assert_eq!(response.status, ResponseStatus::Failed);
    assert!(harness.iot.is_empty());
}
