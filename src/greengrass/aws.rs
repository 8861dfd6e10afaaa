//! AWS IoT Greengrass implementation of [`DeploymentControlPlane`]

use async_trait::async_trait;
use aws_sdk_greengrass::types::DeploymentType;
use aws_sdk_greengrass::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{DeploymentControlPlane, DeploymentKind, DeploymentState, DeploymentSummary};
use crate::Error;

/// Deployment control plane backed by AWS IoT Greengrass
#[derive(Clone, Debug)]
pub struct GreengrassControlPlane {
    client: Client,
}

impl GreengrassControlPlane {
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

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl DeploymentControlPlane for GreengrassControlPlane {
    async fn find_group_id(&self, group_name: &str) -> Result<Option<String>, Error> {
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_groups()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListGroups", e))?;

            if let Some(id) = output
                .groups()
                .iter()
                .find(|g| g.name() == Some(group_name))
                .and_then(|g| g.id())
            {
                return Ok(Some(id.to_string()));
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn latest_group_version(&self, group_id: &str) -> Result<Option<String>, Error> {
        let mut versions: Vec<(Option<DateTime<Utc>>, String)> = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_group_versions()
                .group_id(group_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListGroupVersions", e))?;

            versions.extend(output.versions().iter().filter_map(|v| {
                v.version()
                    .map(|id| (parse_timestamp(v.creation_timestamp()), id.to_string()))
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        // Listing order is newest first; timestamps break any doubt.
        let latest = versions
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.0.cmp(&b.0).then(ib.cmp(ia)))
            .map(|(_, (_, id))| id.clone());
        Ok(latest)
    }

    async fn list_deployments(&self, group_id: &str) -> Result<Vec<DeploymentSummary>, Error> {
        let mut deployments = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_deployments()
                .group_id(group_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::from_sdk("ListDeployments", e))?;

            deployments.extend(output.deployments().iter().filter_map(|d| {
                d.deployment_id().map(|id| DeploymentSummary {
                    deployment_id: id.to_string(),
                    kind: d
                        .deployment_type()
                        .map(|t| DeploymentKind::parse(t.as_str()))
                        .unwrap_or(DeploymentKind::Other(String::new())),
                    created_at: parse_timestamp(d.created_at()),
                })
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(group_id = %group_id, count = deployments.len(), "Listed deployments");
        Ok(deployments)
    }

    async fn deployment_status(
        &self,
        group_id: &str,
        deployment_id: &str,
    ) -> Result<DeploymentState, Error> {
        let output = self
            .client
            .get_deployment_status()
            .group_id(group_id)
            .deployment_id(deployment_id)
            .send()
            .await
            .map_err(|e| Error::from_sdk("GetDeploymentStatus", e))?;

        let status = output.deployment_status().ok_or_else(|| {
            Error::control_plane("GetDeploymentStatus", "response is missing DeploymentStatus")
        })?;
        if let Some(message) = output.error_message() {
            debug!(deployment_id = %deployment_id, error = %message, "Deployment reported an error");
        }
        Ok(DeploymentState::parse(status))
    }

    async fn reset_deployments(&self, group_id: &str, force: bool) -> Result<String, Error> {
        let output = self
            .client
            .reset_deployments()
            .group_id(group_id)
            .force(force)
            .send()
            .await
            .map_err(|e| Error::from_sdk("ResetDeployments", e))?;

        let deployment_id = output.deployment_id().ok_or_else(|| {
            Error::control_plane("ResetDeployments", "response is missing DeploymentId")
        })?;
        info!(group_id = %group_id, deployment_id = %deployment_id, force, "Issued deployment reset");
        Ok(deployment_id.to_string())
    }

    async fn create_deployment(
        &self,
        group_id: &str,
        group_version_id: &str,
    ) -> Result<String, Error> {
        let output = self
            .client
            .create_deployment()
            .group_id(group_id)
            .group_version_id(group_version_id)
            .deployment_type(DeploymentType::NewDeployment)
            .send()
            .await
            .map_err(|e| Error::from_sdk("CreateDeployment", e))?;

        let deployment_id = output.deployment_id().ok_or_else(|| {
            Error::control_plane("CreateDeployment", "response is missing DeploymentId")
        })?;
        Ok(deployment_id.to_string())
    }
}
