//! Deployment-reset handler
//!
//! A deployment group with an active deployment cannot be deleted. This
//! resource sits between the group and its deletion step: on Delete it resets
//! the group's deployments and waits for the reset to settle, so the dependent
//! deletion sees a clean group.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::{HandlerOutput, ResourceHandler};
use crate::config::{ControllerConfig, PollConfig};
use crate::greengrass::{most_recent, DeploymentControlPlane, DeploymentState};
use crate::protocol::RequestContext;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Property naming the deployment group
pub const GROUP_NAME_PROPERTY: &str = "GreengrassGroup";
/// Property asking Create to push the group's latest version
pub const DEPLOY_ON_CREATE_PROPERTY: &str = "DeployOnCreate";

/// Handler that clears a group's deployments before the group is removed
pub struct DeploymentResetHandler {
    greengrass: Arc<dyn DeploymentControlPlane>,
    retry: RetryConfig,
    poll: PollConfig,
}

impl DeploymentResetHandler {
    /// Create a handler over the given deployment control plane
    pub fn new(greengrass: Arc<dyn DeploymentControlPlane>, config: &ControllerConfig) -> Self {
        Self {
            greengrass,
            retry: config.retry(),
            poll: config.reset_poll(),
        }
    }

    async fn find_group(&self, group_name: &str) -> Result<Option<String>, Error> {
        retry_with_backoff(&self.retry, "ListGroups", || {
            self.greengrass.find_group_id(group_name)
        })
        .await
    }

    /// Push the group's latest version; absent group or version is not an error
    async fn deploy_latest(&self, group_name: &str) -> Result<(), Error> {
        let Some(group_id) = self.find_group(group_name).await? else {
            warn!(group = %group_name, "Group not found, skipping initial deployment");
            return Ok(());
        };

        let version = retry_with_backoff(&self.retry, "ListGroupVersions", || {
            self.greengrass.latest_group_version(&group_id)
        })
        .await?;
        let Some(version) = version else {
            warn!(group = %group_name, "Group has no versions, skipping initial deployment");
            return Ok(());
        };

        let deployment_id = retry_with_backoff(&self.retry, "CreateDeployment", || {
            self.greengrass.create_deployment(&group_id, &version)
        })
        .await?;
        info!(
            group = %group_name,
            version = %version,
            deployment_id = %deployment_id,
            "Started deployment"
        );
        Ok(())
    }

    /// Poll a deployment until it reaches a terminal state or the wait runs out
    ///
    /// Returns the terminal state; running out of time is an error.
    async fn poll_until_terminal(
        &self,
        group_id: &str,
        deployment_id: &str,
    ) -> Result<DeploymentState, Error> {
        let started = Instant::now();
        let mut interval = self.poll.initial_interval;

        loop {
            let state = retry_with_backoff(&self.retry, "GetDeploymentStatus", || {
                self.greengrass.deployment_status(group_id, deployment_id)
            })
            .await?;

            if state.is_terminal() {
                debug!(
                    deployment_id = %deployment_id,
                    state = %state,
                    elapsed = ?started.elapsed(),
                    "Reset reached terminal state"
                );
                return Ok(state);
            }
            debug!(deployment_id = %deployment_id, state = %state, "Reset still settling");

            let elapsed = started.elapsed();
            if elapsed >= self.poll.max_wait {
                return Err(Error::timeout(format!(
                    "reset deployment {deployment_id} did not settle within {:?}",
                    self.poll.max_wait
                )));
            }
            sleep(interval.min(self.poll.max_wait - elapsed)).await;
            interval = (interval * 2).min(self.poll.max_interval);
        }
    }

    /// Wait for a reset to succeed
    async fn await_settled(&self, group_id: &str, deployment_id: &str) -> Result<(), Error> {
        match self.poll_until_terminal(group_id, deployment_id).await? {
            DeploymentState::Success => {
                info!(deployment_id = %deployment_id, "Reset settled");
                Ok(())
            }
            _ => Err(Error::control_plane(
                "ResetDeployments",
                format!("reset deployment {deployment_id} failed"),
            )),
        }
    }

    /// Issue a forced reset and wait for it to succeed
    async fn reset_and_settle(&self, group_name: &str, group_id: &str) -> Result<(), Error> {
        info!(group = %group_name, group_id = %group_id, "Resetting deployments");
        let reset_id = retry_with_backoff(&self.retry, "ResetDeployments", || {
            self.greengrass.reset_deployments(group_id, true)
        })
        .await?;

        self.await_settled(group_id, &reset_id).await
    }
}

#[async_trait]
impl ResourceHandler for DeploymentResetHandler {
    fn name_property(&self) -> Option<&'static str> {
        Some(GROUP_NAME_PROPERTY)
    }

    #[instrument(skip(self, ctx), fields(physical_id = %ctx.physical_id()))]
    async fn on_create(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        let props = ctx.properties();
        if props.flag(DEPLOY_ON_CREATE_PROPERTY) {
            let group_name = props.require_str(GROUP_NAME_PROPERTY)?;
            self.deploy_latest(&group_name).await?;
        }
        Ok(HandlerOutput::empty())
    }

    async fn on_update(&self, _ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        Ok(HandlerOutput::empty())
    }

    #[instrument(skip(self, ctx), fields(physical_id = %ctx.physical_id()))]
    async fn on_delete(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
        let Some(group_name) = ctx.properties().get_str(GROUP_NAME_PROPERTY) else {
            warn!("No group name on delete, nothing to reset");
            return Ok(HandlerOutput::empty());
        };

        let Some(group_id) = self.find_group(&group_name).await? else {
            info!(group = %group_name, "Group not found, nothing to reset");
            return Ok(HandlerOutput::empty());
        };

        let deployments = retry_with_backoff(&self.retry, "ListDeployments", || {
            self.greengrass.list_deployments(&group_id)
        })
        .await?;

        let Some(latest) = most_recent(&deployments) else {
            info!(group = %group_name, "Group has no deployments, nothing to reset");
            return Ok(HandlerOutput::empty());
        };
        if latest.kind.is_reset() {
            // A previous Delete issued this reset; trust it only once it succeeded
            let state = self
                .poll_until_terminal(&group_id, &latest.deployment_id)
                .await?;
            if state == DeploymentState::Success {
                info!(
                    group = %group_name,
                    deployment_id = %latest.deployment_id,
                    "Latest deployment is an already settled reset"
                );
                return Ok(HandlerOutput::empty());
            }
            warn!(
                group = %group_name,
                deployment_id = %latest.deployment_id,
                state = %state,
                "Previous reset did not succeed, resetting again"
            );
        }

        self.reset_and_settle(&group_name, &group_id).await?;
        Ok(HandlerOutput::empty())
    }
}
