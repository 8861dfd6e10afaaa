//! Parameter Store implementation of [`SecretStore`]

use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;
use aws_sdk_ssm::Client;
use tracing::{debug, info};

use super::{SecretRecord, SecretStore};
use crate::Error;

/// Secret store backed by SSM `SecureString` parameters
#[derive(Clone, Debug)]
pub struct SsmSecretStore {
    client: Client,
}

impl SsmSecretStore {
    /// Create a store from shared SDK configuration
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

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn put(&self, name: &str, value: &str) -> Result<i64, Error> {
        let output = self
            .client
            .put_parameter()
            .name(name)
            .value(value)
            .r#type(ParameterType::SecureString)
            .overwrite(true)
            .send()
            .await
            .map_err(|e| Error::from_sdk("PutParameter", e))?;

        info!(parameter = %name, version = output.version(), "Stored secret");
        Ok(output.version())
    }

    async fn get(&self, name: &str) -> Result<SecretRecord, Error> {
        let output = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| Error::from_sdk("GetParameter", e))?;

        let parameter = output
            .parameter()
            .ok_or_else(|| Error::not_found(format!("parameter {name}")))?;

        Ok(SecretRecord {
            name: parameter.name().unwrap_or(name).to_string(),
            value: parameter.value().unwrap_or_default().to_string(),
            version: parameter.version(),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        match self.client.delete_parameter().name(name).send().await {
            Ok(_) => {
                info!(parameter = %name, "Deleted secret");
                Ok(())
            }
            Err(e) => match Error::from_sdk("DeleteParameter", e) {
                Error::NotFound(_) => {
                    debug!(parameter = %name, "Secret already absent");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }
}
