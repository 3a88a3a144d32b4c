//! Pre-aggregated metrics endpoints
//!
//! Series endpoints read the cache the scheduler maintains; `aggregated`
//! reads the persistent hourly rollups. A cold cache reads as an empty
//! series, never an error.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;

use crate::api::auth::AuthContext;
use crate::api::types::{ApiError, parse_timestamp_param};
use crate::domain::query::QueryService;

const VALID_STATUSES: &[&str] = &["unresolved", "resolved", "ignored", "muted"];
const VALID_METRIC_TYPES: &[&str] = &["exception", "endpoint", "log_volume"];

const DEFAULT_TOP_ERRORS: usize = 10;
const MAX_TOP_ERRORS: usize = 50;
const DEFAULT_AGGREGATED_DAYS: i64 = 7;

#[derive(Clone)]
pub struct MetricsApiState {
    pub query: Arc<QueryService>,
}

pub fn routes(query: Arc<QueryService>) -> Router<()> {
    Router::new()
        .route("/metrics/error-rate", get(error_rate))
        .route("/metrics/log-volume", get(log_volume))
        .route("/metrics/top-errors", get(top_errors))
        .route("/metrics/usage-stats", get(usage_stats))
        .route("/metrics/aggregated", get(aggregated))
        .with_state(MetricsApiState { query })
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    start_time: Option<String>,
    end_time: Option<String>,
    limit: Option<usize>,
    status: Option<String>,
}

async fn error_rate(
    State(state): State<MetricsApiState>,
    auth: AuthContext,
    Query(params): Query<WindowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = parse_timestamp_param(&params.start_time, "start_time")?;
    let end = parse_timestamp_param(&params.end_time, "end_time")?;
    let data = state.query.error_rate(auth.project_id, start, end).await;

    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "interval": "5min",
        "data": data,
    })))
}

async fn log_volume(
    State(state): State<MetricsApiState>,
    auth: AuthContext,
    Query(params): Query<WindowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = parse_timestamp_param(&params.start_time, "start_time")?;
    let end = parse_timestamp_param(&params.end_time, "end_time")?;
    let data = state.query.log_volume(auth.project_id, start, end).await;

    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "interval": "1hour",
        "data": data,
    })))
}

async fn top_errors(
    State(state): State<MetricsApiState>,
    auth: AuthContext,
    Query(params): Query<WindowQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = parse_timestamp_param(&params.start_time, "start_time")?;
    let end = parse_timestamp_param(&params.end_time, "end_time")?;

    let status = match params.status.as_deref() {
        None => None,
        Some(status) if VALID_STATUSES.contains(&status) => Some(status),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Invalid status '{other}': expected one of {VALID_STATUSES:?}"
            )));
        }
    };

    let limit = params.limit.unwrap_or(DEFAULT_TOP_ERRORS).clamp(1, MAX_TOP_ERRORS);
    let errors = state
        .query
        .top_errors(auth.project_id, limit, start, end, status)
        .await;

    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

async fn usage_stats(
    State(state): State<MetricsApiState>,
    auth: AuthContext,
    Query(params): Query<UsageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let usage = state
        .query
        .usage_stats(auth.project_id, params.start_date, params.end_date)
        .await;

    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "usage": usage,
    })))
}

#[derive(Debug, Deserialize)]
struct AggregatedQuery {
    metric_type: Option<String>,
    /// `YYYYMMDD`, inclusive
    period_from: Option<String>,
    period_to: Option<String>,
}

async fn aggregated(
    State(state): State<MetricsApiState>,
    auth: AuthContext,
    Query(params): Query<AggregatedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let metric_type = match params.metric_type.as_deref() {
        None => None,
        Some(metric_type) if VALID_METRIC_TYPES.contains(&metric_type) => Some(metric_type),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "Invalid metric_type '{other}': expected one of {VALID_METRIC_TYPES:?}"
            )));
        }
    };

    let period_to = match params.period_to.as_deref() {
        Some(period) => validate_period(period)?.to_string(),
        None => Utc::now().format("%Y%m%d").to_string(),
    };
    let period_from = match params.period_from.as_deref() {
        Some(period) => validate_period(period)?.to_string(),
        None => (Utc::now() - ChronoDuration::days(DEFAULT_AGGREGATED_DAYS))
            .format("%Y%m%d")
            .to_string(),
    };

    let rows = state
        .query
        .aggregated_metrics(auth.project_id, metric_type, &period_from, &period_to)
        .await
        .map_err(ApiError::from_postgres)?;

    Ok(Json(serde_json::json!({
        "project_id": auth.project_id,
        "period_from": period_from,
        "period_to": period_to,
        "metrics": rows,
    })))
}

fn validate_period(period: &str) -> Result<&str, ApiError> {
    let valid = period.len() == 8 && period.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(ApiError::bad_request(format!(
            "Invalid period '{period}': expected YYYYMMDD"
        )));
    }
    Ok(period)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_period() {
        assert!(validate_period("20251114").is_ok());
        assert!(validate_period("2025-11-14").is_err());
        assert!(validate_period("202511").is_err());
        assert!(validate_period("2025111x").is_err());
    }
}
