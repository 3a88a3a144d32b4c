//! Cross-cutting request middleware

use std::time::Duration;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::types::ApiError;
use crate::core::constants::REQUEST_DEADLINE_SECS;

/// Per-request deadline. The timeout covers work up to the response head;
/// streaming bodies (SSE) are intentionally long-lived and unaffected.
pub async fn request_deadline(request: Request, next: Next) -> Response {
    match tokio::time::timeout(
        Duration::from_secs(REQUEST_DEADLINE_SECS),
        next.run(request),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(deadline_secs = REQUEST_DEADLINE_SECS, "Request deadline exceeded");
            ApiError::service_unavailable("Request deadline exceeded", None).into_response()
        }
    }
}

pub async fn handle_404() -> ApiError {
    ApiError::not_found("Resource not found")
}
