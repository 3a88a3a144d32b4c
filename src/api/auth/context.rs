//! Authenticated request context

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::types::ApiError;

/// What the gate resolved the request's credential to. Injected into request
/// extensions by `require_credential`; handlers take it as an extractor.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub project_id: i64,
    pub account_id: Option<i64>,
    /// Digest of the presented credential (rate-limit key, never the plaintext)
    pub credential_hash: String,
    pub daily_quota: i64,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
