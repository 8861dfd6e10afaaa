//! Scenario tests for the lifecycle controller
//!
//! Tests are organized by the story they tell:
//!
//! - `device_identity`: provisioning, updating, and tearing down a device
//!   identity through repeated and redelivered requests
//!
//! - `deployment_reset`: clearing a group's deployments before the group is
//!   deleted
//!
//! - `malformed_input`: envelopes that never reach a handler still get
//!   exactly one response

mod deployment_reset;
mod device_identity;
mod malformed_input;
