//! Policy gate middleware
//!
//! Per-request pipeline on every data-plane route: credential extraction →
//! resolution (C1, breaker-guarded) → dual-window rate limit → daily quota →
//! handler. Successful responses carry the rate-limit headers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use super::context::AuthContext;
use crate::api::types::{ApiError, apply_rate_limit_headers};
use crate::data::cache::{DailyUsage, RateLimiter, RateLimits};
use crate::domain::auth::{AuthError, CredentialResolver};

#[derive(Clone)]
pub struct GateState {
    pub resolver: Arc<CredentialResolver>,
    pub limiter: Arc<RateLimiter>,
    pub usage: Arc<DailyUsage>,
}

pub async fn require_credential(
    State(state): State<GateState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingCredential)?;
    let credential = extract_credential(auth_header)?;

    let resolved = state.resolver.resolve(credential).await?;
    let record = resolved.record;

    let limits = RateLimits {
        per_minute: record.rate_limit_per_minute,
        per_hour: record.rate_limit_per_hour,
    };
    let decision = state.limiter.check(&resolved.credential_hash, &limits).await;
    if !decision.allowed {
        tracing::warn!(
            project_id = record.project_id,
            minute_count = decision.minute_count,
            hour_count = decision.hour_count,
            "Request rate limited"
        );
        return Err(ApiError::rate_limited(decision));
    }

    let used = state.usage.current(record.project_id).await;
    if used >= record.daily_quota {
        tracing::warn!(
            project_id = record.project_id,
            used,
            quota = record.daily_quota,
            "Daily quota exceeded"
        );
        return Err(ApiError::QuotaExceeded(format!(
            "Daily quota exceeded: {used}/{}",
            record.daily_quota
        )));
    }

    request.extensions_mut().insert(AuthContext {
        project_id: record.project_id,
        account_id: record.account_id,
        credential_hash: resolved.credential_hash,
        daily_quota: record.daily_quota,
    });

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}

/// Accept `Bearer <key>` or a bare token
fn extract_credential(header: &str) -> Result<&str, AuthError> {
    let parts: Vec<&str> = header.split_whitespace().collect();
    match parts.as_slice() {
        [token] if !token.is_empty() => Ok(token),
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_credential_bearer() {
        assert_eq!(extract_credential("Bearer fl_abc").unwrap(), "fl_abc");
        assert_eq!(extract_credential("bearer fl_abc").unwrap(), "fl_abc");
    }

    #[test]
    fn test_extract_credential_bare() {
        assert_eq!(extract_credential("fl_abc").unwrap(), "fl_abc");
    }

    #[test]
    fn test_extract_credential_rejects_other_schemes() {
        assert!(matches!(
            extract_credential("Basic dXNlcjpwYXNz"),
            Err(AuthError::MalformedHeader)
        ));
        assert!(matches!(
            extract_credential("Bearer a b"),
            Err(AuthError::MalformedHeader)
        ));
        assert!(matches!(extract_credential(""), Err(AuthError::MalformedHeader)));
    }
}
