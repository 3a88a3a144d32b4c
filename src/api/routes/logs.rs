//! Raw log retrieval and search
//!
//! Every query runs under a time range; requests without one are bounded to
//! the last 24 hours so a full-table scan is impossible. Pagination is
//! OFFSET by default with keyset (`after_timestamp` + `after_id`) for deep
//! scans.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::auth::AuthContext;
use crate::api::types::{
    ApiError, DEFAULT_QUERY_LIMIT, DEFAULT_QUERY_WINDOW_HOURS, MAX_QUERY_LIMIT,
    parse_timestamp_param,
};
use crate::data::postgres::repositories::logs::LogFilter;
use crate::domain::events::StoredLogEvent;
use crate::domain::query::QueryService;

#[derive(Clone)]
pub struct LogsApiState {
    pub query: Arc<QueryService>,
}

pub fn routes(query: Arc<QueryService>) -> Router<()> {
    Router::new()
        .route("/logs", get(list_logs))
        .route("/logs/search", get(search_logs))
        .route("/logs/{id}", get(get_log))
        .with_state(LogsApiState { query })
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    start_time: Option<String>,
    end_time: Option<String>,
    level: Option<String>,
    log_type: Option<String>,
    environment: Option<String>,
    error_fingerprint: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    /// Keyset cursor: both or neither of these must be present
    after_timestamp: Option<String>,
    after_id: Option<i64>,
    /// Search text (only on /logs/search)
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    logs: Vec<StoredLogEvent>,
    total: i64,
    has_more: bool,
}

async fn list_logs(
    State(state): State<LogsApiState>,
    auth: AuthContext,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let filter = build_filter(&params)?;
    let page = state
        .query
        .query_logs(auth.project_id, &filter)
        .await
        .map_err(ApiError::from_postgres)?;

    Ok(Json(LogsResponse {
        logs: page.logs,
        total: page.total,
        has_more: page.has_more,
    }))
}

async fn search_logs(
    State(state): State<LogsApiState>,
    auth: AuthContext,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let text = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter 'q' is required"))?
        .to_string();

    let filter = build_filter(&params)?;
    let page = state
        .query
        .search_logs(auth.project_id, &text, &filter)
        .await
        .map_err(ApiError::from_postgres)?;

    Ok(Json(LogsResponse {
        logs: page.logs,
        total: page.total,
        has_more: page.has_more,
    }))
}

async fn get_log(
    State(state): State<LogsApiState>,
    auth: AuthContext,
    Path(log_id): Path<i64>,
) -> Result<Json<StoredLogEvent>, ApiError> {
    state
        .query
        .get_log(auth.project_id, log_id)
        .await
        .map_err(ApiError::from_postgres)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Log {log_id} not found")))
}

fn build_filter(params: &LogsQuery) -> Result<LogFilter, ApiError> {
    let end_time = parse_timestamp_param(&params.end_time, "end_time")?.unwrap_or_else(Utc::now);
    let start_time = parse_timestamp_param(&params.start_time, "start_time")?
        .unwrap_or_else(|| end_time - ChronoDuration::hours(DEFAULT_QUERY_WINDOW_HOURS));

    if start_time >= end_time {
        return Err(ApiError::bad_request(
            "start_time must be strictly before end_time",
        ));
    }

    let level = params
        .level
        .as_deref()
        .map(|text| {
            text.parse()
                .map_err(|_| ApiError::bad_request(format!("Invalid level '{text}'")))
        })
        .transpose()?;
    let log_type = params
        .log_type
        .as_deref()
        .map(|text| {
            text.parse()
                .map_err(|_| ApiError::bad_request(format!("Invalid log_type '{text}'")))
        })
        .transpose()?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let after = match (&params.after_timestamp, params.after_id) {
        (Some(ts), Some(id)) => {
            let ts = parse_timestamp_param(&Some(ts.clone()), "after_timestamp")?
                .expect("present param parses or errors");
            Some((ts, id))
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "after_timestamp and after_id must be provided together",
            ));
        }
    };

    Ok(LogFilter {
        start_time,
        end_time,
        level,
        log_type,
        environment: params.environment.clone(),
        error_fingerprint: params.error_fingerprint.clone(),
        limit,
        offset,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_params() -> LogsQuery {
        LogsQuery {
            start_time: None,
            end_time: None,
            level: None,
            log_type: None,
            environment: None,
            error_fingerprint: None,
            limit: None,
            offset: None,
            after_timestamp: None,
            after_id: None,
            q: None,
        }
    }

    #[test]
    fn test_missing_range_defaults_to_last_24h() {
        let filter = build_filter(&empty_params()).unwrap();
        let window = filter.end_time - filter.start_time;
        assert_eq!(window, ChronoDuration::hours(24));
        assert_eq!(filter.limit, DEFAULT_QUERY_LIMIT);
        assert_eq!(filter.offset, 0);
    }

    #[test]
    fn test_limit_is_capped() {
        let mut params = empty_params();
        params.limit = Some(100_000);
        assert_eq!(build_filter(&params).unwrap().limit, MAX_QUERY_LIMIT);

        params.limit = Some(0);
        assert_eq!(build_filter(&params).unwrap().limit, 1);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut params = empty_params();
        params.start_time = Some("2025-11-14T10:00:00Z".into());
        params.end_time = Some("2025-11-14T09:00:00Z".into());
        assert!(build_filter(&params).is_err());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut params = empty_params();
        params.level = Some("fatal".into());
        assert!(build_filter(&params).is_err());
    }

    #[test]
    fn test_keyset_cursor_requires_both_parts() {
        let mut params = empty_params();
        params.after_id = Some(42);
        assert!(build_filter(&params).is_err());

        params.after_timestamp = Some("2025-11-14T10:00:00Z".into());
        let filter = build_filter(&params).unwrap();
        assert_eq!(
            filter.after,
            Some(("2025-11-14T10:00:00Z".parse().unwrap(), 42))
        );
    }
}
