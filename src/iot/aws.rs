//! AWS IoT Core implementation of [`DeviceControlPlane`]

use async_trait::async_trait;
use aws_sdk_iot::types::CertificateStatus;
use aws_sdk_iot::Client;
use tracing::debug;

use super::{DeviceControlPlane, IssuedCertificate, PolicyVersion};
use crate::Error;

/// Device-identity control plane backed by AWS IoT Core
#[derive(Clone, Debug)]
pub struct IotControlPlane {
    client: Client,
}

impl IotControlPlane {
    /// Create a control plane from shared SDK configuration
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    /// Create from a pre-built client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn missing(operation: &str, field: &str) -> Error {
    Error::control_plane(operation, format!("response is missing {field}"))
}

#[async_trait]
impl DeviceControlPlane for IotControlPlane {
    async fn create_thing(&self, thing_name: &str) -> Result<String, Error> {
        let output = self
            .client
            .create_thing()
            .thing_name(thing_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("CreateThing", e))?;

        output
            .thing_arn()
            .map(str::to_string)
            .ok_or_else(|| missing("CreateThing", "thingArn"))
    }

    async fn describe_thing(&self, thing_name: &str) -> Result<String, Error> {
        let output = self
            .client
            .describe_thing()
            .thing_name(thing_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DescribeThing", e))?;

        output
            .thing_arn()
            .map(str::to_string)
            .ok_or_else(|| missing("DescribeThing", "thingArn"))
    }

    async fn delete_thing(&self, thing_name: &str) -> Result<(), Error> {
        self.client
            .delete_thing()
            .thing_name(thing_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DeleteThing", e))?;
        Ok(())
    }

    async fn create_keys_and_certificate(&self) -> Result<IssuedCertificate, Error> {
        const OP: &str = "CreateKeysAndCertificate";

        let output = self
            .client
            .create_keys_and_certificate()
            .set_as_active(true)
            .send()
            .await
            .map_err(|e| Error::from_sdk(OP, e))?;

        let private_key_pem = output
            .key_pair()
            .and_then(|kp| kp.private_key())
            .ok_or_else(|| missing(OP, "keyPair.PrivateKey"))?;

        Ok(IssuedCertificate {
            certificate_arn: output
                .certificate_arn()
                .ok_or_else(|| missing(OP, "certificateArn"))?
                .to_string(),
            certificate_id: output
                .certificate_id()
                .ok_or_else(|| missing(OP, "certificateId"))?
                .to_string(),
            certificate_pem: output
                .certificate_pem()
                .ok_or_else(|| missing(OP, "certificatePem"))?
                .to_string(),
            private_key_pem: private_key_pem.to_string(),
        })
    }

    async fn describe_certificate(&self, certificate_id: &str) -> Result<String, Error> {
        let output = self
            .client
            .describe_certificate()
            .certificate_id(certificate_id)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DescribeCertificate", e))?;

        output
            .certificate_description()
            .and_then(|d| d.certificate_pem())
            .map(str::to_string)
            .ok_or_else(|| missing("DescribeCertificate", "certificatePem"))
    }

    async fn deactivate_certificate(&self, certificate_id: &str) -> Result<(), Error> {
        self.client
            .update_certificate()
            .certificate_id(certificate_id)
            .new_status(CertificateStatus::Inactive)
            .send()
            .await
            .map_err(|e| Error::from_sdk("UpdateCertificate", e))?;
        Ok(())
    }

    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), Error> {
        self.client
            .delete_certificate()
            .certificate_id(certificate_id)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DeleteCertificate", e))?;
        Ok(())
    }

    async fn attach_thing_principal(
        &self,
        thing_name: &str,
        principal: &str,
    ) -> Result<(), Error> {
        self.client
            .attach_thing_principal()
            .thing_name(thing_name)
            .principal(principal)
            .send()
            .await
            .map_err(|e| Error::from_sdk("AttachThingPrincipal", e))?;
        Ok(())
    }

    async fn list_thing_principals(&self, thing_name: &str) -> Result<Vec<String>, Error> {
        let mut principals = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_thing_principals()
                .thing_name(thing_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListThingPrincipals", e))?;

            principals.extend(output.principals().iter().cloned());

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(thing = %thing_name, count = principals.len(), "Listed thing principals");
        Ok(principals)
    }

    async fn detach_thing_principal(
        &self,
        thing_name: &str,
        principal: &str,
    ) -> Result<(), Error> {
        self.client
            .detach_thing_principal()
            .thing_name(thing_name)
            .principal(principal)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DetachThingPrincipal", e))?;
        Ok(())
    }

    async fn create_policy(&self, policy_name: &str, document: &str) -> Result<(), Error> {
        self.client
            .create_policy()
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| Error::from_sdk("CreatePolicy", e))?;
        Ok(())
    }

    async fn get_policy_document(&self, policy_name: &str) -> Result<String, Error> {
        let output = self
            .client
            .get_policy()
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("GetPolicy", e))?;

        output
            .policy_document()
            .map(str::to_string)
            .ok_or_else(|| missing("GetPolicy", "policyDocument"))
    }

    async fn create_policy_version(
        &self,
        policy_name: &str,
        document: &str,
    ) -> Result<(), Error> {
        self.client
            .create_policy_version()
            .policy_name(policy_name)
            .policy_document(document)
            .set_as_default(true)
            .send()
            .await
            .map_err(|e| Error::from_sdk("CreatePolicyVersion", e))?;
        Ok(())
    }

    async fn list_policy_versions(&self, policy_name: &str) -> Result<Vec<PolicyVersion>, Error> {
        let output = self
            .client
            .list_policy_versions()
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("ListPolicyVersions", e))?;

        Ok(output
            .policy_versions()
            .iter()
            .filter_map(|v| {
                v.version_id().map(|id| PolicyVersion {
                    version_id: id.to_string(),
                    is_default: v.is_default_version(),
                })
            })
            .collect())
    }

    async fn delete_policy_version(
        &self,
        policy_name: &str,
        version_id: &str,
    ) -> Result<(), Error> {
        self.client
            .delete_policy_version()
            .policy_name(policy_name)
            .policy_version_id(version_id)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DeletePolicyVersion", e))?;
        Ok(())
    }

    async fn delete_policy(&self, policy_name: &str) -> Result<(), Error> {
        self.client
            .delete_policy()
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DeletePolicy", e))?;
        Ok(())
    }

    async fn attach_policy(&self, policy_name: &str, target: &str) -> Result<(), Error> {
        self.client
            .attach_policy()
            .policy_name(policy_name)
            .target(target)
            .send()
            .await
            .map_err(|e| Error::from_sdk("AttachPolicy", e))?;
        Ok(())
    }

    async fn list_attached_policies(&self, target: &str) -> Result<Vec<String>, Error> {
        let mut policies = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_attached_policies()
                .target(target)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListAttachedPolicies", e))?;

            policies.extend(
                output
                    .policies()
                    .iter()
                    .filter_map(|p| p.policy_name().map(str::to_string)),
            );

            match output.next_marker() {
                Some(m) if !m.is_empty() => marker = Some(m.to_string()),
                _ => break,
            }
        }

        Ok(policies)
    }

    async fn list_policy_targets(&self, policy_name: &str) -> Result<Vec<String>, Error> {
        let mut targets = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_targets_for_policy()
                .policy_name(policy_name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListTargetsForPolicy", e))?;

            targets.extend(output.targets().iter().cloned());

            match output.next_marker() {
                Some(m) if !m.is_empty() => marker = Some(m.to_string()),
                _ => break,
            }
        }

        Ok(targets)
    }

    async fn detach_policy(&self, policy_name: &str, target: &str) -> Result<(), Error> {
        self.client
            .detach_policy()
            .policy_name(policy_name)
            .target(target)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DetachPolicy", e))?;
        Ok(())
    }

    async fn describe_endpoint(&self, endpoint_type: &str) -> Result<String, Error> {
        let output = self
            .client
            .describe_endpoint()
            .endpoint_type(endpoint_type)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DescribeEndpoint", e))?;

        output
            .endpoint_address()
            .map(str::to_string)
            .ok_or_else(|| missing("DescribeEndpoint", "endpointAddress"))
    }
}
