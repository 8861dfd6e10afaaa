//! Physical resource identity derivation
//!
//! Physical ids are version-5 UUIDs in the DNS namespace, so the same seed
//! always maps to the same id without any external coordination. Ids received
//! from the orchestrator on Update/Delete are carried through verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable external identifier of a managed resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalId(String);

impl PhysicalId {
    /// Derive the physical id for a seed
    pub fn derive(seed: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, seed.as_bytes()).to_string())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PhysicalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PhysicalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
