//! Resource handlers
//!
//! One [`ResourceHandler`] implementation per resource kind. Handlers are
//! stateless: every call receives an immutable [`RequestContext`] and all
//! durable state lives in the external control planes.

mod deployment_reset;
mod device_identity;

pub use deployment_reset::{DeploymentResetHandler, GROUP_NAME_PROPERTY, DEPLOY_ON_CREATE_PROPERTY};
pub use device_identity::{
    policy_name_for, DeviceIdentityHandler, POLICY_PROPERTY, THING_NAME_PROPERTY,
};

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::protocol::RequestContext;
use crate::Error;

/// Output attributes a handler reports on success
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HandlerOutput {
    /// Attributes returned to the orchestrator
    pub data: BTreeMap<String, String>,
    /// True when `data` carries one-time secret material
    pub sensitive: bool,
}

impl HandlerOutput {
    /// Output with no attributes
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output with the given attributes
    pub fn with_data(data: BTreeMap<String, String>) -> Self {
        Self {
            data,
            sensitive: false,
        }
    }

    /// Mark the output as carrying secrets
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

impl std::fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerOutput")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

/// Lifecycle contract implemented once per resource kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Property holding the resource's natural name, used to seed physical ids
    fn name_property(&self) -> Option<&'static str>;

    /// Provision the resource
    async fn on_create(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error>;

    /// Apply property changes to an existing resource
    async fn on_update(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error>;

    /// Remove the resource; must succeed when it is already gone
    async fn on_delete(&self, ctx: &RequestContext) -> Result<HandlerOutput, Error>;
}
