//! edge-lifecycle - custom-resource lifecycle controller for edge fleets
//!
//! An infrastructure orchestrator sends Create, Update, and Delete requests
//! for custom resources it cannot manage natively. This crate answers them:
//! it provisions device identities (thing, certificate, policy, stored
//! credentials) and clears active deployments so their groups can be torn
//! down.
//!
//! # Architecture
//!
//! - A single [`dispatcher::LifecycleDispatcher`] receives every request,
//!   routes it by resource type, and always delivers exactly one response.
//! - One [`handler::ResourceHandler`] per resource kind. Handlers are stateless
//!   and idempotent under redelivery.
//! - External systems sit behind traits ([`iot::DeviceControlPlane`],
//!   [`greengrass::DeploymentControlPlane`], [`secrets::SecretStore`],
//!   [`response::ResponseSender`]) with AWS-backed implementations.
//!
//! # Modules
//!
//! - [`protocol`] - Request/response envelopes and the request context
//! - [`identity`] - Deterministic physical ids
//! - [`dispatcher`] - Routing, time budgets, and response delivery
//! - [`handler`] - Device-identity and deployment-reset handlers
//! - [`iot`] - Device control plane (things, certificates, policies)
//! - [`greengrass`] - Deployment control plane (groups, deployments)
//! - [`secrets`] - Secure storage for issued credentials
//! - [`response`] - HTTP delivery of responses
//! - [`server`] - HTTP invocation endpoint
//! - [`config`] - CLI/environment configuration
//! - [`retry`] - Bounded exponential backoff
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod greengrass;
pub mod handler;
pub mod identity;
pub mod iot;
pub mod protocol;
pub mod response;
pub mod retry;
pub mod secrets;
pub mod server;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default total time allowed for one invocation, in seconds
pub const DEFAULT_INVOCATION_BUDGET_SECS: u64 = 30;

/// Default share of the invocation budget held back for response delivery
///
/// A handler that times out still leaves this much time to report FAILED.
pub const DEFAULT_DELIVERY_MARGIN_SECS: u64 = 5;

/// Resource type served by the device-identity handler
pub const DEVICE_IDENTITY_RESOURCE_TYPE: &str = "Custom::IotThingCertPolicy";

/// Resource type served by the deployment-reset handler
pub const DEPLOYMENT_RESET_RESOURCE_TYPE: &str = "Custom::GreengrassResetDeployment";
