//! Lifecycle dispatcher
//!
//! Routes each request to the handler registered for its resource type and
//! turns whatever happens (success, error, panic, timeout) into exactly one
//! response, which is delivered before `handle` returns.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::ControllerConfig;
use crate::handler::{HandlerOutput, ResourceHandler};
use crate::protocol::{
    Correlation, LifecycleRequest, LifecycleResponse, RequestContext, RequestType,
    FAIL_CREATE_PROPERTY,
};
use crate::response::ResponseSender;
use crate::Error;

/// Entry point for lifecycle requests
pub struct LifecycleDispatcher {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
    sender: Arc<dyn ResponseSender>,
    handler_budget: Duration,
    delivery_margin: Duration,
}

impl LifecycleDispatcher {
    /// Create a dispatcher with explicit time budgets
    pub fn new(
        sender: Arc<dyn ResponseSender>,
        handler_budget: Duration,
        delivery_margin: Duration,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            sender,
            handler_budget,
            delivery_margin,
        }
    }

    /// Create a dispatcher using the configured invocation budget split
    pub fn from_config(sender: Arc<dyn ResponseSender>, config: &ControllerConfig) -> Self {
        Self::new(sender, config.handler_budget(), config.delivery_margin())
    }

    /// Route `resource_type` to `handler`, replacing any earlier registration
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> &mut Self {
        self.handlers.insert(resource_type.into(), handler);
        self
    }

    /// Registered resource types, sorted
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Handle one request and deliver its response
    ///
    /// Never fails: every outcome becomes a response, and the same response
    /// is returned to the caller after delivery has been attempted.
    pub async fn handle(&self, request: LifecycleRequest) -> LifecycleResponse {
        let span = info_span!(
            "lifecycle",
            request_id = %request.request_id,
            resource_type = %request.resource_kind,
            request_type = %request.request_type,
            logical_id = %request.logical_resource_id,
        );

        async move {
            let response_url = request.response_url.clone();
            let response = self.execute(request).await;
            self.deliver(&response_url, &response).await;
            response
        }
        .instrument(span)
        .await
    }

    /// Handle an untyped envelope
    ///
    /// A body that does not parse as a request still gets a FAILED response
    /// built from whatever correlation fields can be recovered.
    pub async fn handle_raw(&self, raw: Value) -> LifecycleResponse {
        let parse_error = match serde_json::from_value::<LifecycleRequest>(raw.clone()) {
            Ok(request) => return self.handle(request).await,
            Err(e) => e,
        };

        let correlation = Correlation::salvage(&raw);
        warn!(
            request_id = %correlation.request_id,
            error = %parse_error,
            "Rejecting malformed request"
        );
        let response = LifecycleResponse::failed(
            &correlation,
            &correlation.fallback_physical_id(),
            format!("malformed request: {parse_error}"),
        );

        match &correlation.response_url {
            Some(url) => self.deliver(url, &response).await,
            None => error!(
                request_id = %correlation.request_id,
                "Malformed request has no ResponseURL, response cannot be delivered"
            ),
        }
        response
    }

    async fn execute(&self, request: LifecycleRequest) -> LifecycleResponse {
        let correlation = request.correlation();

        let Some(handler) = self.handlers.get(&request.resource_kind).cloned() else {
            warn!("No handler registered for resource type");
            let physical_id = request.resolve_physical_id(None);
            return LifecycleResponse::failed(
                &correlation,
                &physical_id,
                format!("unsupported resource type {}", request.resource_kind),
            );
        };

        let ctx = RequestContext::new(request, handler.name_property());
        let physical_id = ctx.physical_id().clone();
        info!(physical_id = %physical_id, "Handling lifecycle request");

        let outcome = tokio::time::timeout(
            self.handler_budget,
            AssertUnwindSafe(invoke(handler.as_ref(), &ctx)).catch_unwind(),
        )
        .await;

        match outcome {
            Ok(Ok(Ok(HandlerOutput { data, sensitive }))) => {
                info!(physical_id = %physical_id, "Lifecycle request succeeded");
                LifecycleResponse::success(&correlation, &physical_id, data, sensitive)
            }
            Ok(Ok(Err(e))) => {
                warn!(physical_id = %physical_id, error = %e, "Lifecycle request failed");
                LifecycleResponse::failed(&correlation, &physical_id, e.to_string())
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(physical_id = %physical_id, panic = %message, "Handler panicked");
                LifecycleResponse::failed(
                    &correlation,
                    &physical_id,
                    format!("internal error: handler panicked: {message}"),
                )
            }
            Err(_) => {
                let e = Error::timeout(format!(
                    "handler did not finish within {}s",
                    self.handler_budget.as_secs_f64()
                ));
                error!(physical_id = %physical_id, error = %e, "Handler timed out");
                LifecycleResponse::failed(&correlation, &physical_id, e.to_string())
            }
        }
    }

    /// Deliver a response; failures are logged, never raised
    async fn deliver(&self, response_url: &str, response: &LifecycleResponse) {
        match tokio::time::timeout(self.delivery_margin, self.sender.send(response_url, response))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                request_id = %response.request_id,
                error = %e,
                "Failed to deliver response"
            ),
            Err(_) => error!(
                request_id = %response.request_id,
                margin = ?self.delivery_margin,
                "Response delivery timed out"
            ),
        }
    }
}

async fn invoke(handler: &dyn ResourceHandler, ctx: &RequestContext) -> Result<HandlerOutput, Error> {
    match ctx.request_type() {
        RequestType::Create => {
            if ctx.properties().flag(FAIL_CREATE_PROPERTY) {
                return Err(Error::Requested(format!(
                    "Create failed on request ({FAIL_CREATE_PROPERTY} is set)"
                )));
            }
            handler.on_create(ctx).await
        }
        RequestType::Update => handler.on_update(ctx).await,
        RequestType::Delete => handler.on_delete(ctx).await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
