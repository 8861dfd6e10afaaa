//! Secret store adapter
//!
//! Small named secrets written at device-identity creation so operators can
//! recover credentials later. The controller itself never reads them back
//! during normal operation.

mod ssm;

pub use ssm::SsmSecretStore;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// A stored secret
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRecord {
    /// Record name
    pub name: String,
    /// Secret value
    pub value: String,
    /// Store-assigned version, increasing on every overwrite
    pub version: i64,
}

impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

/// Trait abstracting the secret store
///
/// `get` reports a missing record as [`Error::NotFound`]; `delete` of a
/// missing record succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create or overwrite a record, returning its new version
    async fn put(&self, name: &str, value: &str) -> Result<i64, Error>;

    /// Read a record
    async fn get(&self, name: &str) -> Result<SecretRecord, Error>;

    /// Remove a record; missing records are not an error
    async fn delete(&self, name: &str) -> Result<(), Error>;
}
