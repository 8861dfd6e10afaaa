//! Device-identity control plane
//!
//! The [`DeviceControlPlane`] trait covers the thing, certificate, and policy
//! calls the device-identity handler needs. [`IotControlPlane`] implements it
//! against AWS IoT Core.

mod aws;

pub use aws::IotControlPlane;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// A freshly issued certificate and its key pair
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Certificate ARN
    pub certificate_arn: String,
    /// Certificate id (last ARN segment)
    pub certificate_id: String,
    /// PEM-encoded certificate
    pub certificate_pem: String,
    /// PEM-encoded private key; only available at issue time
    pub private_key_pem: String,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_arn", &self.certificate_arn)
            .field("certificate_id", &self.certificate_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// One version of a policy document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyVersion {
    /// Version id
    pub version_id: String,
    /// True for the version currently in force
    pub is_default: bool,
}

/// Extract the certificate id from a certificate ARN
///
/// `arn:aws:iot:us-east-1:123456789012:cert/abc` yields `abc`.
pub fn certificate_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// True if a thing principal is an X.509 certificate
pub fn is_certificate_arn(principal: &str) -> bool {
    principal.contains(":cert/")
}

/// Trait abstracting device-identity control-plane operations
///
/// Missing objects are reported as [`Error::NotFound`] so callers can decide
/// whether absence is acceptable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeviceControlPlane: Send + Sync {
    /// Create a thing, returning its ARN
    async fn create_thing(&self, thing_name: &str) -> Result<String, Error>;

    /// Look up a thing's ARN
    async fn describe_thing(&self, thing_name: &str) -> Result<String, Error>;

    /// Delete a thing
    async fn delete_thing(&self, thing_name: &str) -> Result<(), Error>;

    /// Issue an active certificate with a new key pair
    async fn create_keys_and_certificate(&self) -> Result<IssuedCertificate, Error>;

    /// Fetch the PEM body of a certificate
    async fn describe_certificate(&self, certificate_id: &str) -> Result<String, Error>;

    /// Mark a certificate inactive
    async fn deactivate_certificate(&self, certificate_id: &str) -> Result<(), Error>;

    /// Delete an inactive, detached certificate
    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), Error>;

    /// Attach a principal to a thing
    async fn attach_thing_principal(&self, thing_name: &str, principal: &str)
        -> Result<(), Error>;

    /// List principals attached to a thing
    async fn list_thing_principals(&self, thing_name: &str) -> Result<Vec<String>, Error>;

    /// Detach a principal from a thing
    async fn detach_thing_principal(&self, thing_name: &str, principal: &str)
        -> Result<(), Error>;

    /// Create a policy from a JSON document
    async fn create_policy(&self, policy_name: &str, document: &str) -> Result<(), Error>;

    /// Fetch the default version of a policy document
    async fn get_policy_document(&self, policy_name: &str) -> Result<String, Error>;

    /// Publish a new policy version and make it the default
    async fn create_policy_version(&self, policy_name: &str, document: &str)
        -> Result<(), Error>;

    /// List versions of a policy
    async fn list_policy_versions(&self, policy_name: &str) -> Result<Vec<PolicyVersion>, Error>;

    /// Delete a non-default policy version
    async fn delete_policy_version(&self, policy_name: &str, version_id: &str)
        -> Result<(), Error>;

    /// Delete a policy that has no non-default versions and no targets
    async fn delete_policy(&self, policy_name: &str) -> Result<(), Error>;

    /// Attach a policy to a target principal
    async fn attach_policy(&self, policy_name: &str, target: &str) -> Result<(), Error>;

    /// List policies attached to a target principal
    async fn list_attached_policies(&self, target: &str) -> Result<Vec<String>, Error>;

    /// Detach a policy from a target principal
    async fn detach_policy(&self, policy_name: &str, target: &str) -> Result<(), Error>;

    /// List principals a policy is attached to
    async fn list_policy_targets(&self, policy_name: &str) -> Result<Vec<String>, Error>;

    /// Resolve the account's data-plane endpoint
    async fn describe_endpoint(&self, endpoint_type: &str) -> Result<String, Error>;
}
