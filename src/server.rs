//! HTTP invocation endpoint
//!
//! Accepts request envelopes over HTTP and answers with the response envelope
//! that was also delivered to the orchestrator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;

use crate::dispatcher::LifecycleDispatcher;

/// Create the invocation router
///
/// Routes:
/// - `POST /invocations` - Handle one lifecycle request envelope
/// - `GET /healthz` - Liveness check
pub fn invocation_router(dispatcher: Arc<LifecycleDispatcher>) -> Router {
    Router::new()
        .route("/invocations", post(invoke_handler))
        .route("/healthz", get(health_handler))
        .with_state(dispatcher)
}

async fn invoke_handler(
    State(dispatcher): State<Arc<LifecycleDispatcher>>,
    body: Bytes,
) -> Response {
    match serde_json::from_slice(&body) {
        Ok(raw) => Json(dispatcher.handle_raw(raw).await).into_response(),
        Err(e) => {
            // Nothing to correlate against, so nothing can be delivered
            warn!(error = %e, "Invocation body is not JSON");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("body is not JSON: {e}")})),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}
