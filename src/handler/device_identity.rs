//! Device-identity handler
//!
//! Provisions a thing, an active certificate with its key pair, and an access
//! policy, and wires them together. The private key exists exactly once: in
//! the Create response and in the secret record written alongside it.
//!
//! Create does not roll back on partial failure. Whatever was created stays in
//! place until a Delete for the same physical id removes it, and Delete treats
//! every already-missing piece as done.
//!
//! Only certificates carrying the identity's policy are deactivated and
//! deleted. Other principals an operator attached to the thing are detached
//! and left alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{HandlerOutput, ResourceHandler};
use crate::config::ControllerConfig;
use crate::iot::{certificate_id_from_arn, is_certificate_arn, DeviceControlPlane, PolicyVersion};
use crate::protocol::RequestContext;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::secrets::SecretStore;
use crate::Error;

/// Property naming the thing
pub const THING_NAME_PROPERTY: &str = "IotThingName";
/// Property holding the policy document (JSON string or object)
pub const POLICY_PROPERTY: &str = "IotPolicy";

/// Versions a policy may hold before the oldest must be pruned
const POLICY_VERSION_LIMIT: usize = 5;
/// Longest thing name the control plane accepts
const MAX_THING_NAME_LEN: usize = 128;

/// Name of the policy owned by a thing
pub fn policy_name_for(thing_name: &str) -> String {
    format!("{thing_name}-policy")
}

/// Check a thing name against the control plane's naming rules
fn validate_thing_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > MAX_THING_NAME_LEN {
        return Err(Error::validation(format!(
            "{THING_NAME_PROPERTY} must be 1-{MAX_THING_NAME_LEN} characters, got {}",
            name.len()
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-')))
    {
        return Err(Error::validation(format!(
            "{THING_NAME_PROPERTY} '{name}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Parse a policy document and render it canonically (sorted keys, compact)
fn canonical_policy(raw: &str) -> Result<String, Error> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::validation(format!("{POLICY_PROPERTY} is not valid JSON: {e}")))?;

    let statement = parsed
        .as_object()
        .ok_or_else(|| Error::validation(format!("{POLICY_PROPERTY} must be a JSON object")))?
        .get("Statement");
    match statement {
        Some(serde_json::Value::Array(_)) | Some(serde_json::Value::Object(_)) => {}
        _ => {
            return Err(Error::validation(format!(
                "{POLICY_PROPERTY} must contain a Statement"
            )))
        }
    }

    Ok(parsed.to_string())
}

/// A provisioned device identity
struct DeviceIdentity {
    thing_name: String,
    thing_arn: String,
    certificate_arn: String,
    certificate_id: String,
    certificate_pem: String,
    private_key_pem: Option<String>,
    policy_name: String,
    endpoint_address: String,
}

/// Secret record body written at Create
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials<'a> {
    thing_name: &'a str,
    thing_arn: &'a str,
    certificate_arn: &'a str,
    certificate_pem: &'a str,
    private_key_pem: &'a str,
    policy_name: &'a str,
    endpoint_address: &'a str,
}

impl DeviceIdentity {
    fn secret_value(&self) -> Result<String, Error> {
        let private_key_pem = self.private_key_pem.as_deref().ok_or_else(|| {
            Error::serialization("private key is only available at creation time")
        })?;
        let record = StoredCredentials {
            thing_name: &self.thing_name,
            thing_arn: &self.thing_arn,
            certificate_arn: &self.certificate_arn,
            certificate_pem: &self.certificate_pem,
            private_key_pem,
            policy_name: &self.policy_name,
            endpoint_address: &self.endpoint_address,
        };
        Ok(serde_json::to_string(&record)?)
    }

    fn into_output(self) -> HandlerOutput {
        let mut data = BTreeMap::from([
            ("thingName".to_string(), self.thing_name),
            ("thingArn".to_string(), self.thing_arn),
            ("certificateArn".to_string(), self.certificate_arn),
            ("certificateId".to_string(), self.certificate_id),
            ("certificatePem".to_string(), self.certificate_pem),
            ("policyName".to_string(), self.policy_name),
            ("endpointAddress".to_string(), self.endpoint_address),
        ]);

        match self.private_key_pem {
            Some(key) => {
                data.insert("privateKeyPem".to_string(), key);
                HandlerOutput::with_data(data).sensitive()
            }
            None => HandlerOutput::with_data(data),
        }
    }
}

/// Treat a missing object as an already-completed step
fn tolerate_missing<T: Default>(step: &str, result: Result<T, Error>) -> Result<T, Error> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(step = %step, "Already absent, continuing");
            Ok(T::default())
        }
        other => other,
    }
}

/// Handler for thing + certificate + policy resources
pub struct DeviceIdentityHandler {
    iot: Arc<dyn DeviceControlPlane>,
    secrets: Arc<dyn SecretStore>,
    retry: RetryConfig,
    endpoint_type: String,
    secret_prefix: String,
}

impl DeviceIdentityHandler {
    /// Create a handler over the given control plane and secret store
    pub fn new(
        iot: Arc<dyn DeviceControlPlane>,
        secrets: Arc<dyn SecretStore>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            iot,
            secrets,
            retry: config.retry(),
            endpoint_type: config.endpoint_type.clone(),
            secret_prefix: config.secret_prefix.clone(),
        }
    }

    /// Secret record name for a thing
    pub fn secret_name(&self, thing_name: &str) -> String {
        format!("{}{}", self.secret_prefix, thing_name)
    }

    async fn resolve_endpoint(&self) -> Result<String, Error> {
        retry_with_backoff(&self.retry, "DescribeEndpoint", || {
            self.iot.describe_endpoint(&self.endpoint_type)
        })
        .await
    }

    /// Certificate attached to a thing that carries the identity's policy
    async fn attached_certificate(
        &self,
        thing_name: &str,
        policy_name: &str,
    ) -> Result<String, Error> {
        let principals = retry_with_backoff(&self.retry, "ListThingPrincipals", || {
            self.iot.list_thing_principals(thing_name)
        })
        .await?;

        for principal in principals.iter().filter(|p| is_certificate_arn(p)) {
            if self
                .attached_policies(principal)
                .await?
                .iter()
                .any(|p| p == policy_name)
            {
                return Ok(principal.clone());
            }
        }
        Err(Error::not_found(format!(
            "no certificate carrying {policy_name} attached to thing {thing_name}"
        )))
    }

    /// Publish a new default policy version, pruning the oldest if at the limit
    async fn publish_policy_version(&self, policy_name: &str, document: &str) -> Result<(), Error> {
        let versions = retry_with_backoff(&self.retry, "ListPolicyVersions", || {
            self.iot.list_policy_versions(policy_name)
        })
        .await?;

        if versions.len() >= POLICY_VERSION_LIMIT {
            if let Some(oldest) = oldest_non_default(&versions) {
                info!(policy = %policy_name, version = %oldest, "Pruning oldest policy version");
                retry_with_backoff(&self.retry, "DeletePolicyVersion", || {
                    self.iot.delete_policy_version(policy_name, oldest)
                })
                .await?;
            }
        }

        retry_with_backoff(&self.retry, "CreatePolicyVersion", || {
            self.iot.create_policy_version(policy_name, document)
        })
        .await
    }

    /// Policies attached to a principal; an already-deleted principal has none
    async fn attached_policies(&self, principal: &str) -> Result<Vec<String>, Error> {
        tolerate_missing(
            "ListAttachedPolicies",
            retry_with_backoff(&self.retry, "ListAttachedPolicies", || {
                self.iot.list_attached_policies(principal)
            })
            .await,
        )
    }

    async fn detach_from_thing(&self, thing_name: &str, principal: &str) -> Result<(), Error> {
        tolerate_missing(
            "DetachThingPrincipal",
            retry_with_backoff(&self.retry, "DetachThingPrincipal", || {
                self.iot.detach_thing_principal(thing_name, principal)
            })
            .await,
        )
    }

    /// Deactivate, detach, and delete one of the identity's certificates
    ///
    /// `thing_name` is `None` for certificates found only through the policy.
    /// The identity's own policy is detached last, so a Delete interrupted
    /// before that point still finds the certificate through the policy.
    async fn remove_certificate(
        &self,
        thing_name: Option<&str>,
        certificate_arn: &str,
        policies: &[String],
        own_policy: &str,
    ) -> Result<(), Error> {
        let certificate_id = certificate_id_from_arn(certificate_arn);

        tolerate_missing(
            "UpdateCertificate",
            retry_with_backoff(&self.retry, "UpdateCertificate", || {
                self.iot.deactivate_certificate(certificate_id)
            })
            .await,
        )?;

        if let Some(thing_name) = thing_name {
            self.detach_from_thing(thing_name, certificate_arn).await?;
        }

        let foreign = policies.iter().filter(|p| p.as_str() != own_policy);
        let own = policies.iter().filter(|p| p.as_str() == own_policy);
        for policy in foreign.chain(own) {
            tolerate_missing(
                "DetachPolicy",
                retry_with_backoff(&self.retry, "DetachPolicy", || {
                    self.iot.detach_policy(policy, certificate_arn)
                })
                .await,
            )?;
            info!(policy = %policy, certificate_id = %certificate_id, "Detached policy");
        }

        // Deletion is refused until the detaches above have propagated
        tolerate_missing(
            "DeleteCertificate",
            retry_with_backoff(&self.retry, "DeleteCertificate", || {
                self.iot.delete_certificate(certificate_id)
            })
            .await,
        )?;
        info!(certificate_id = %certificate_id, "Deleted certificate");

        Ok(())
    }

    async fn remove_policy(&self, policy_name: &str) -> Result<(), Error> {
        let versions = tolerate_missing(
            "ListPolicyVersions",
            retry_with_backoff(&self.retry, "ListPolicyVersions", || {
                self.iot.list_policy_versions(policy_name)
            })
            .await,
        )?;
        for version in versions.iter().filter(|v| !v.is_default) {
            tolerate_missing(
                "DeletePolicyVersion",
                retry_with_backoff(&self.retry, "DeletePolicyVersion", || {
                    self.iot.delete_policy_version(policy_name, &version.version_id)
                })
                .await,
            )?;
        }

        tolerate_missing(
            "DeletePolicy",
            retry_with_backoff(&self.retry, "DeletePolicy", || {
                self.iot.delete_policy(policy_name)
            })
            .await,
        )
    }
}

/// Lowest-numbered version that is not in force
fn oldest_non_default(versions: &[PolicyVersion]) -> Option<&str> {
    versions
        .iter()
        .filter(|v| !v.is_default)
        .min_by_key(|v| v.version_id.parse::<u64>().unwrap_or(u64::MAX))
        .map(|v| v.version_id.as_str())
}

#[async_trait]
impl ResourceHandler for DeviceIdentityHandler {
    fn name_property(&self) -> Option<&'static str> {
        Some(THING_NAME_PROPERTY)
    }

    #[instrument(skip(self, ctx), fields(physical_id = %ctx.physical_id()))]
    async fn on_create(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        let props = ctx.properties();
        let thing_name = props.require_str(THING_NAME_PROPERTY)?;
        validate_thing_name(&thing_name)?;
        let document = canonical_policy(&props.require_str(POLICY_PROPERTY)?)?;
        let policy_name = policy_name_for(&thing_name);

        info!(thing = %thing_name, "Creating device identity");

        let thing_arn = retry_with_backoff(&self.retry, "CreateThing", || {
            self.iot.create_thing(&thing_name)
        })
        .await?;
        info!(thing = %thing_name, thing_arn = %thing_arn, "Created thing");

        // Issued once; a retried call could leave an orphaned certificate
        let certificate = self.iot.create_keys_and_certificate().await?;
        info!(certificate_arn = %certificate.certificate_arn, "Issued certificate");

        retry_with_backoff(&self.retry, "CreatePolicy", || {
            self.iot.create_policy(&policy_name, &document)
        })
        .await?;

        retry_with_backoff(&self.retry, "AttachPolicy", || {
            self.iot.attach_policy(&policy_name, &certificate.certificate_arn)
        })
        .await?;
        info!(policy = %policy_name, "Attached policy to certificate");

        retry_with_backoff(&self.retry, "AttachThingPrincipal", || {
            self.iot
                .attach_thing_principal(&thing_name, &certificate.certificate_arn)
        })
        .await?;
        info!(thing = %thing_name, "Attached certificate to thing");

        let endpoint_address = self.resolve_endpoint().await?;

        let identity = DeviceIdentity {
            thing_name: thing_name.clone(),
            thing_arn,
            certificate_arn: certificate.certificate_arn,
            certificate_id: certificate.certificate_id,
            certificate_pem: certificate.certificate_pem,
            private_key_pem: Some(certificate.private_key_pem),
            policy_name,
            endpoint_address,
        };

        let secret_name = self.secret_name(&thing_name);
        let secret_value = identity.secret_value()?;
        let version = retry_with_backoff(&self.retry, "PutParameter", || {
            self.secrets.put(&secret_name, &secret_value)
        })
        .await?;
        info!(secret = %secret_name, version, "Stored device credentials");

        Ok(identity.into_output())
    }

    #[instrument(skip(self, ctx), fields(physical_id = %ctx.physical_id()))]
    async fn on_update(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        let props = ctx.properties();
        let thing_name = props.require_str(THING_NAME_PROPERTY)?;
        validate_thing_name(&thing_name)?;
        let document = canonical_policy(&props.require_str(POLICY_PROPERTY)?)?;
        let policy_name = policy_name_for(&thing_name);

        if let Some(old_name) = ctx
            .old_properties()
            .and_then(|old| old.get_str(THING_NAME_PROPERTY))
        {
            if old_name != thing_name {
                return Err(Error::validation(format!(
                    "{THING_NAME_PROPERTY} cannot change from '{old_name}' to '{thing_name}'; \
                     replace the resource instead"
                )));
            }
        }

        let previous = match ctx
            .old_properties()
            .and_then(|old| old.get_str(POLICY_PROPERTY))
        {
            Some(raw) => canonical_policy(&raw).ok(),
            None => {
                let current = retry_with_backoff(&self.retry, "GetPolicy", || {
                    self.iot.get_policy_document(&policy_name)
                })
                .await?;
                canonical_policy(&current).ok()
            }
        };

        if previous.as_deref() == Some(document.as_str()) {
            debug!(policy = %policy_name, "Policy document unchanged");
        } else {
            info!(policy = %policy_name, "Policy document changed, publishing new version");
            self.publish_policy_version(&policy_name, &document).await?;
        }

        let thing_arn = retry_with_backoff(&self.retry, "DescribeThing", || {
            self.iot.describe_thing(&thing_name)
        })
        .await?;
        let certificate_arn = self.attached_certificate(&thing_name, &policy_name).await?;
        let certificate_id = certificate_id_from_arn(&certificate_arn).to_string();
        let certificate_pem = retry_with_backoff(&self.retry, "DescribeCertificate", || {
            self.iot.describe_certificate(&certificate_id)
        })
        .await?;
        let endpoint_address = self.resolve_endpoint().await?;

        Ok(DeviceIdentity {
            thing_name,
            thing_arn,
            certificate_arn,
            certificate_id,
            certificate_pem,
            private_key_pem: None,
            policy_name,
            endpoint_address,
        }
        .into_output())
    }

    #[instrument(skip(self, ctx), fields(physical_id = %ctx.physical_id()))]
    async fn on_delete(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        let thing_name = match ctx.properties().get_str(THING_NAME_PROPERTY) {
            Some(name) if validate_thing_name(&name).is_ok() => name,
            other => {
                // Create could not have provisioned anything under this name
                warn!(thing = ?other, "No valid thing name on delete, nothing to remove");
                return Ok(HandlerOutput::empty());
            }
        };
        let policy_name = policy_name_for(&thing_name);

        info!(thing = %thing_name, "Deleting device identity");

        let principals = tolerate_missing(
            "ListThingPrincipals",
            retry_with_backoff(&self.retry, "ListThingPrincipals", || {
                self.iot.list_thing_principals(&thing_name)
            })
            .await,
        )?;
        for principal in &principals {
            let policies = self.attached_policies(principal).await?;
            if is_certificate_arn(principal) && policies.contains(&policy_name) {
                self.remove_certificate(
                    Some(thing_name.as_str()),
                    principal,
                    &policies,
                    &policy_name,
                )
                .await?;
            } else {
                info!(principal = %principal, "Detaching principal not issued for this identity");
                self.detach_from_thing(&thing_name, principal).await?;
            }
        }

        // Certificates left behind by a Create that failed before attaching
        // them, or by a Delete interrupted after detaching them from the thing
        let targets = tolerate_missing(
            "ListTargetsForPolicy",
            retry_with_backoff(&self.retry, "ListTargetsForPolicy", || {
                self.iot.list_policy_targets(&policy_name)
            })
            .await,
        )?;
        for target in &targets {
            if is_certificate_arn(target) {
                warn!(principal = %target, "Removing certificate not attached to the thing");
                let policies = self.attached_policies(target).await?;
                self.remove_certificate(None, target, &policies, &policy_name)
                    .await?;
            } else {
                tolerate_missing(
                    "DetachPolicy",
                    retry_with_backoff(&self.retry, "DetachPolicy", || {
                        self.iot.detach_policy(&policy_name, target)
                    })
                    .await,
                )?;
            }
        }

        self.remove_policy(&policy_name).await?;
        info!(policy = %policy_name, "Deleted policy");

        tolerate_missing(
            "DeleteThing",
            retry_with_backoff(&self.retry, "DeleteThing", || {
                self.iot.delete_thing(&thing_name)
            })
            .await,
        )?;
        info!(thing = %thing_name, "Deleted thing");

        let secret_name = self.secret_name(&thing_name);
        retry_with_backoff(&self.retry, "DeleteParameter", || {
            self.secrets.delete(&secret_name)
        })
        .await?;

        Ok(HandlerOutput::empty())
    }
}
