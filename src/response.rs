//! Response delivery to the orchestrator
//!
//! Responses go back by HTTP PUT to the pre-signed location carried in the
//! request. The signature covers an empty content type, so none is sent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::protocol::LifecycleResponse;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Trait abstracting the response channel
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseSender: Send + Sync {
    /// Deliver a response to the given location
    async fn send(&self, response_url: &str, response: &LifecycleResponse) -> Result<(), Error>;
}

/// Delivers responses with HTTP PUT
pub struct HttpResponseSender {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl HttpResponseSender {
    /// Create a sender whose requests time out after `timeout`
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::delivery(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, retry })
    }

    async fn put_once(&self, response_url: &str, body: &str) -> Result<(), Error> {
        let reply = self
            .http
            .put(response_url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, body.len())
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Error::transient("PutResponse", e.to_string()))?;

        let status = reply.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = reply.text().await.unwrap_or_default();
        let message = format!("{status}: {detail}");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(Error::transient("PutResponse", message))
        } else {
            Err(Error::delivery(message))
        }
    }
}

#[async_trait]
impl ResponseSender for HttpResponseSender {
    async fn send(&self, response_url: &str, response: &LifecycleResponse) -> Result<(), Error> {
        let body = serde_json::to_string(response)?;
        debug!(request_id = %response.request_id, bytes = body.len(), "Delivering response");

        let body = body.as_str();
        retry_with_backoff(&self.retry, "deliver_response", move || {
            self.put_once(response_url, body)
        })
        .await
        .map_err(|e| match e {
            Error::Delivery(_) => e,
            other => Error::delivery(other.to_string()),
        })?;

        info!(
            request_id = %response.request_id,
            status = ?response.status,
            "Response delivered"
        );
        Ok(())
    }
}
