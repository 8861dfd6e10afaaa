//! Controller configuration
//!
//! Every setting can come from a CLI flag or an `EDGE_LIFECYCLE_*` environment
//! variable. The defaults describe a 30 second invocation budget with 5
//! seconds held back for response delivery.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;

use crate::retry::RetryConfig;
use crate::{
    DEFAULT_DELIVERY_MARGIN_SECS, DEFAULT_INVOCATION_BUDGET_SECS, DEPLOYMENT_RESET_RESOURCE_TYPE,
    DEVICE_IDENTITY_RESOURCE_TYPE,
};

/// Settings shared by the dispatcher, handlers, and AWS clients
#[derive(Args, Clone, Debug)]
pub struct ControllerConfig {
    /// AWS region override (defaults to the SDK provider chain)
    #[arg(long, env = "EDGE_LIFECYCLE_REGION")]
    pub region: Option<String>,

    /// Total time allowed for one invocation, in seconds
    #[arg(long, env = "EDGE_LIFECYCLE_INVOCATION_BUDGET_SECS", default_value_t = DEFAULT_INVOCATION_BUDGET_SECS)]
    pub invocation_budget_secs: u64,

    /// Portion of the budget reserved for delivering the response, in seconds
    #[arg(long, env = "EDGE_LIFECYCLE_DELIVERY_MARGIN_SECS", default_value_t = DEFAULT_DELIVERY_MARGIN_SECS)]
    pub delivery_margin_secs: u64,

    /// Attempts per external call before a transient error becomes terminal
    #[arg(long, env = "EDGE_LIFECYCLE_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// First retry delay, in milliseconds
    #[arg(long, env = "EDGE_LIFECYCLE_RETRY_INITIAL_MS", default_value_t = 200)]
    pub retry_initial_ms: u64,

    /// Upper bound for a single retry delay, in milliseconds
    #[arg(long, env = "EDGE_LIFECYCLE_RETRY_MAX_MS", default_value_t = 4000)]
    pub retry_max_ms: u64,

    /// How long a deployment reset may take to settle, in seconds
    #[arg(long, env = "EDGE_LIFECYCLE_RESET_WAIT_SECS", default_value_t = 18)]
    pub reset_wait_secs: u64,

    /// Initial interval between deployment status polls, in milliseconds
    #[arg(long, env = "EDGE_LIFECYCLE_RESET_POLL_MS", default_value_t = 500)]
    pub reset_poll_ms: u64,

    /// Prefix prepended to secret record names
    #[arg(long, env = "EDGE_LIFECYCLE_SECRET_PREFIX", default_value = "")]
    pub secret_prefix: String,

    /// Data-plane endpoint type resolved for new device identities
    #[arg(long, env = "EDGE_LIFECYCLE_ENDPOINT_TYPE", default_value = "iot:Data-ATS")]
    pub endpoint_type: String,

    /// Resource type routed to the device-identity handler
    #[arg(long, env = "EDGE_LIFECYCLE_DEVICE_IDENTITY_TYPE", default_value = DEVICE_IDENTITY_RESOURCE_TYPE)]
    pub device_identity_type: String,

    /// Resource type routed to the deployment-reset handler
    #[arg(long, env = "EDGE_LIFECYCLE_DEPLOYMENT_RESET_TYPE", default_value = DEPLOYMENT_RESET_RESOURCE_TYPE)]
    pub deployment_reset_type: String,

    /// Listen address for the invocation endpoint
    #[arg(long, env = "EDGE_LIFECYCLE_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            region: None,
            invocation_budget_secs: DEFAULT_INVOCATION_BUDGET_SECS,
            delivery_margin_secs: DEFAULT_DELIVERY_MARGIN_SECS,
            max_attempts: 5,
            retry_initial_ms: 200,
            retry_max_ms: 4000,
            reset_wait_secs: 18,
            reset_poll_ms: 500,
            secret_prefix: String::new(),
            endpoint_type: "iot:Data-ATS".to_string(),
            device_identity_type: DEVICE_IDENTITY_RESOURCE_TYPE.to_string(),
            deployment_reset_type: DEPLOYMENT_RESET_RESOURCE_TYPE.to_string(),
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ControllerConfig {
    /// Total invocation budget
    pub fn invocation_budget(&self) -> Duration {
        Duration::from_secs(self.invocation_budget_secs)
    }

    /// Time the handler may use before the dispatcher gives up on it
    ///
    /// Never less than one second, so a misconfigured margin still lets a
    /// handler start.
    pub fn handler_budget(&self) -> Duration {
        let secs = self
            .invocation_budget_secs
            .saturating_sub(self.delivery_margin_secs)
            .max(1);
        Duration::from_secs(secs)
    }

    /// Time reserved for response delivery
    pub fn delivery_margin(&self) -> Duration {
        Duration::from_secs(self.delivery_margin_secs.max(1))
    }

    /// Retry policy for external calls
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// Polling policy for deployment resets
    pub fn reset_poll(&self) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(self.reset_poll_ms),
            max_interval: Duration::from_secs(4),
            max_wait: Duration::from_secs(self.reset_wait_secs),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.delivery_margin_secs >= self.invocation_budget_secs {
            return Err(crate::Error::validation(format!(
                "delivery margin ({}s) must be smaller than the invocation budget ({}s)",
                self.delivery_margin_secs, self.invocation_budget_secs
            )));
        }
        if self.reset_wait_secs >= self.handler_budget().as_secs() {
            return Err(crate::Error::validation(format!(
                "reset wait ({}s) must fit inside the handler budget ({}s)",
                self.reset_wait_secs,
                self.handler_budget().as_secs()
            )));
        }
        if self.device_identity_type == self.deployment_reset_type {
            return Err(crate::Error::validation(
                "device identity and deployment reset resource types must differ",
            ));
        }
        Ok(())
    }
}

/// Bounded polling with exponential backoff
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// First interval between polls
    pub initial_interval: Duration,
    /// Largest interval between polls
    pub max_interval: Duration,
    /// Give up once this much time has elapsed
    pub max_wait: Duration,
}
