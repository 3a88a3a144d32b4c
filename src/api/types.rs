//! Shared API types
//!
//! Every error leaves the API as `{"detail": <string>}` plus the status
//! code; rate-limit and backpressure errors additionally carry their retry
//! headers.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use crate::data::cache::RateLimitDecision;
use crate::data::postgres::error::PostgresError;
use crate::domain::auth::AuthError;
use crate::domain::ingest::IngestError;

/// Default page size for log queries
pub const DEFAULT_QUERY_LIMIT: i64 = 100;
/// Hard cap for log query page size
pub const MAX_QUERY_LIMIT: i64 = 1000;
/// Queries without a time range are bounded to this window
pub const DEFAULT_QUERY_WINDOW_HOURS: i64 = 24;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    RateLimited {
        detail: String,
        retry_after_secs: u64,
        decision: RateLimitDecision,
    },
    QuotaExceeded(String),
    ServiceUnavailable {
        detail: String,
        retry_after_secs: Option<u64>,
    },
    Internal(String),
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::BadRequest(detail.into())
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn service_unavailable(detail: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::ServiceUnavailable {
            detail: detail.into(),
            retry_after_secs,
        }
    }

    pub fn rate_limited(decision: RateLimitDecision) -> Self {
        let detail = if decision.hour_exceeded() {
            format!(
                "Hourly rate limit exceeded. Current: {}, Limit: {}",
                decision.hour_count, decision.hour_limit
            )
        } else {
            format!(
                "Per-minute rate limit exceeded. Current: {}, Limit: {}",
                decision.minute_count, decision.minute_limit
            )
        };
        let retry_after_secs = decision.retry_after.unwrap_or(60);
        Self::RateLimited {
            detail,
            retry_after_secs,
            decision,
        }
    }

    pub fn from_postgres(e: PostgresError) -> Self {
        tracing::error!(error = %e, "Database error");
        if e.is_transient() {
            Self::ServiceUnavailable {
                detail: "Storage temporarily unavailable".to_string(),
                retry_after_secs: None,
            }
        } else {
            Self::Internal("Database operation failed".to_string())
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredential | AuthError::MalformedHeader | AuthError::InvalidKey => {
                Self::Unauthorized(e.to_string())
            }
            AuthError::AuthorityUnavailable { retry_after_secs } => Self::ServiceUnavailable {
                detail: e.to_string(),
                retry_after_secs: Some(retry_after_secs),
            },
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::QueueFull {
                retry_after_secs, ..
            } => Self::ServiceUnavailable {
                detail: "Service temporarily unavailable - queue full".to_string(),
                retry_after_secs: Some(retry_after_secs),
            },
            IngestError::Queue(err) => {
                tracing::error!(error = %err, "Queue error during ingest");
                Self::ServiceUnavailable {
                    detail: "Ingestion queue unavailable".to_string(),
                    retry_after_secs: None,
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();

        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::Unauthorized(detail) => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                (StatusCode::UNAUTHORIZED, detail)
            }
            Self::Forbidden(detail) => (StatusCode::FORBIDDEN, detail),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Conflict(detail) => (StatusCode::CONFLICT, detail),
            Self::RateLimited {
                detail,
                retry_after_secs,
                decision,
            } => {
                insert_header(&mut headers, header::RETRY_AFTER, retry_after_secs.to_string());
                apply_rate_limit_headers(&mut headers, &decision);
                (StatusCode::TOO_MANY_REQUESTS, detail)
            }
            Self::QuotaExceeded(detail) => (StatusCode::TOO_MANY_REQUESTS, detail),
            Self::ServiceUnavailable {
                detail,
                retry_after_secs,
            } => {
                if let Some(secs) = retry_after_secs {
                    insert_header(&mut headers, header::RETRY_AFTER, secs.to_string());
                }
                (StatusCode::SERVICE_UNAVAILABLE, detail)
            }
            Self::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };

        (status, headers, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Rate-limit headers attached to both allowed and rejected responses
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    insert_header(headers, "X-RateLimit-Limit-Minute", decision.minute_limit.to_string());
    insert_header(
        headers,
        "X-RateLimit-Remaining-Minute",
        decision.minute_remaining().to_string(),
    );
    insert_header(headers, "X-RateLimit-Limit-Hour", decision.hour_limit.to_string());
    insert_header(
        headers,
        "X-RateLimit-Remaining-Hour",
        decision.hour_remaining().to_string(),
    );
    insert_header(headers, "X-RateLimit-Reset", decision.reset_at.to_string());
}

fn insert_header(
    headers: &mut HeaderMap,
    name: impl axum::http::header::IntoHeaderName,
    value: String,
) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

/// Parse an optional RFC 3339 timestamp query parameter
pub fn parse_timestamp_param(
    value: &Option<String>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                ApiError::bad_request(format!(
                    "Invalid {name} '{text}': expected ISO 8601 timestamp"
                ))
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_param() {
        let parsed = parse_timestamp_param(&Some("2025-11-14T10:00:00Z".into()), "start_time")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, "2025-11-14T10:00:00Z".parse::<DateTime<Utc>>().unwrap());

        assert!(parse_timestamp_param(&None, "start_time").unwrap().is_none());
        assert!(parse_timestamp_param(&Some("yesterday".into()), "start_time").is_err());
    }

    #[test]
    fn test_rate_limited_detail_names_the_window() {
        let decision = RateLimitDecision {
            allowed: false,
            minute_count: 6,
            minute_limit: 5,
            hour_count: 6,
            hour_limit: 1000,
            reset_at: 0,
            retry_after: Some(42),
        };
        match ApiError::rate_limited(decision) {
            ApiError::RateLimited {
                detail,
                retry_after_secs,
                ..
            } => {
                assert!(detail.contains("Per-minute"), "{detail}");
                assert_eq!(retry_after_secs, 42);
            }
            _ => unreachable!(),
        }
    }
}
