//! Deployment control plane
//!
//! A deployment group cannot be deleted while it has an active deployment.
//! [`DeploymentControlPlane`] exposes the lookups and the reset call the
//! deployment-reset handler needs; [`GreengrassControlPlane`] implements it
//! against AWS IoT Greengrass.

mod aws;

pub use aws::GreengrassControlPlane;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Kind of a recorded deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeploymentKind {
    /// First push of a group version
    New,
    /// Re-push of a previous deployment
    Redeployment,
    /// Reset that tears the group's running state down
    Reset,
    /// Reset that does not wait for the core to acknowledge
    ForceReset,
    /// Anything the controller does not recognise
    Other(String),
}

impl DeploymentKind {
    /// Parse the control plane's deployment type string
    pub fn parse(s: &str) -> Self {
        match s {
            "NewDeployment" => Self::New,
            "Redeployment" => Self::Redeployment,
            "ResetDeployment" => Self::Reset,
            "ForceResetDeployment" => Self::ForceReset,
            other => Self::Other(other.to_string()),
        }
    }

    /// True for both reset kinds
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Reset | Self::ForceReset)
    }
}

/// Status of a single deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeploymentState {
    /// Deployment artifacts are being built
    Building,
    /// Deployment is rolling out
    InProgress,
    /// Deployment finished
    Success,
    /// Deployment failed
    Failure,
    /// Unrecognised status string
    Other(String),
}

impl DeploymentState {
    /// Parse the control plane's status string
    pub fn parse(s: &str) -> Self {
        match s {
            "Building" => Self::Building,
            "InProgress" => Self::InProgress,
            "Success" => Self::Success,
            "Failure" => Self::Failure,
            other => Self::Other(other.to_string()),
        }
    }

    /// True once the deployment will not change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Building => write!(f, "Building"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A deployment recorded for a group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentSummary {
    /// Deployment id
    pub deployment_id: String,
    /// Deployment kind
    pub kind: DeploymentKind,
    /// Creation time, when the control plane reported a parseable one
    pub created_at: Option<DateTime<Utc>>,
}

/// Pick the most recent deployment
///
/// Entries without a timestamp sort before timestamped ones; ties keep the
/// control plane's order, which lists the newest first.
pub fn most_recent(deployments: &[DeploymentSummary]) -> Option<&DeploymentSummary> {
    deployments
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ib.cmp(ia)))
        .map(|(_, d)| d)
}

/// Trait abstracting deployment control-plane operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentControlPlane: Send + Sync {
    /// Resolve a group id by group name
    async fn find_group_id(&self, group_name: &str) -> Result<Option<String>, Error>;

    /// Most recent version of a group, if it has any
    async fn latest_group_version(&self, group_id: &str) -> Result<Option<String>, Error>;

    /// All deployments recorded for a group
    async fn list_deployments(&self, group_id: &str) -> Result<Vec<DeploymentSummary>, Error>;

    /// Current status of one deployment
    async fn deployment_status(
        &self,
        group_id: &str,
        deployment_id: &str,
    ) -> Result<DeploymentState, Error>;

    /// Reset a group's deployments, returning the reset deployment's id
    async fn reset_deployments(&self, group_id: &str, force: bool) -> Result<String, Error>;

    /// Push a group version as a new deployment, returning its id
    async fn create_deployment(&self, group_id: &str, group_version_id: &str)
        -> Result<String, Error>;
}
