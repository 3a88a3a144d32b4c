//! Query service
//!
//! Read path over the logs store and the pre-aggregated metrics cache. Raw
//! log retrieval always runs under a time range (`LogFilter` makes the
//! bounds non-optional, so partition pruning cannot be bypassed); metric
//! reads come from the cache and are window-filtered in process, the same
//! way the source series were cached.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::data::cache::{CacheKey, CacheService};
use crate::data::postgres::PostgresService;
use crate::data::postgres::error::PostgresError;
use crate::data::postgres::repositories::logs::{self, LogFilter, LogPage};
use crate::data::postgres::repositories::metrics::{self, AggregatedMetricRow};
use crate::domain::analytics::{ErrorRatePoint, LogVolumePoint, TopError, UsagePoint};
use crate::domain::events::StoredLogEvent;

pub struct QueryService {
    logs_db: Arc<PostgresService>,
    cache: Arc<CacheService>,
}

impl QueryService {
    pub fn new(logs_db: Arc<PostgresService>, cache: Arc<CacheService>) -> Self {
        Self { logs_db, cache }
    }

    // =========================================================================
    // Raw log retrieval
    // =========================================================================

    pub async fn get_log(
        &self,
        project_id: i64,
        log_id: i64,
    ) -> Result<Option<StoredLogEvent>, PostgresError> {
        logs::get_log(self.logs_db.pool(), project_id, log_id).await
    }

    pub async fn query_logs(
        &self,
        project_id: i64,
        filter: &LogFilter,
    ) -> Result<LogPage, PostgresError> {
        logs::query_logs(self.logs_db.pool(), project_id, filter).await
    }

    pub async fn search_logs(
        &self,
        project_id: i64,
        query_text: &str,
        filter: &LogFilter,
    ) -> Result<LogPage, PostgresError> {
        logs::search_logs(self.logs_db.pool(), project_id, query_text, filter).await
    }

    // =========================================================================
    // Pre-aggregated metrics (cache-backed; a cold cache reads as empty)
    // =========================================================================

    pub async fn error_rate(
        &self,
        project_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<ErrorRatePoint> {
        let series: Vec<ErrorRatePoint> = self
            .read_cached(&CacheKey::metrics_error_rate(project_id))
            .await;
        filter_by_window(series, start, end, |p| p.timestamp)
    }

    pub async fn log_volume(
        &self,
        project_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LogVolumePoint> {
        let series: Vec<LogVolumePoint> = self
            .read_cached(&CacheKey::metrics_log_volume(project_id))
            .await;
        filter_by_window(series, start, end, |p| p.timestamp)
    }

    pub async fn top_errors(
        &self,
        project_id: i64,
        limit: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        status: Option<&str>,
    ) -> Vec<TopError> {
        let errors: Vec<TopError> = self
            .read_cached(&CacheKey::metrics_top_errors(project_id))
            .await;
        filter_top_errors(errors, limit, start, end, status)
    }

    pub async fn usage_stats(
        &self,
        project_id: i64,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Vec<UsagePoint> {
        let usage: Vec<UsagePoint> = self
            .read_cached(&CacheKey::metrics_usage_stats(project_id))
            .await;
        usage
            .into_iter()
            .filter(|point| {
                start_date.is_none_or(|start| point.date >= start)
                    && end_date.is_none_or(|end| point.date <= end)
            })
            .collect()
    }

    /// Hourly rollups, straight from the persistent store
    pub async fn aggregated_metrics(
        &self,
        project_id: i64,
        metric_type: Option<&str>,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<AggregatedMetricRow>, PostgresError> {
        metrics::query_aggregated(self.logs_db.pool(), project_id, metric_type, date_from, date_to)
            .await
    }

    async fn read_cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.cache.get::<Vec<T>>(key).await {
            Ok(Some(series)) => series,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Metrics cache read failed");
                Vec::new()
            }
        }
    }
}

fn filter_by_window<T>(
    series: Vec<T>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    series
        .into_iter()
        .filter(|point| {
            let ts = timestamp(point);
            start.is_none_or(|s| ts >= s) && end.is_none_or(|e| ts <= e)
        })
        .collect()
}

/// A group overlaps the window when it was last seen after `start` and first
/// seen before `end`
fn filter_top_errors(
    errors: Vec<TopError>,
    limit: usize,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    status: Option<&str>,
) -> Vec<TopError> {
    errors
        .into_iter()
        .filter(|error| {
            start.is_none_or(|s| error.last_seen >= s)
                && end.is_none_or(|e| error.first_seen <= e)
                && status.is_none_or(|wanted| error.status == wanted)
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn point(timestamp: &str) -> ErrorRatePoint {
        ErrorRatePoint {
            timestamp: ts(timestamp),
            error_count: 1,
            critical_count: 0,
        }
    }

    fn top_error(fingerprint: &str, first: &str, last: &str, status: &str) -> TopError {
        TopError {
            fingerprint: fingerprint.into(),
            error_type: "ValueError".into(),
            error_message: None,
            occurrence_count: 5,
            first_seen: ts(first),
            last_seen: ts(last),
            status: status.into(),
            sample_log_id: None,
        }
    }

    #[test]
    fn test_filter_by_window_bounds() {
        let series = vec![
            point("2025-11-14T09:00:00Z"),
            point("2025-11-14T10:00:00Z"),
            point("2025-11-14T11:00:00Z"),
        ];
        let filtered = filter_by_window(
            series,
            Some(ts("2025-11-14T09:30:00Z")),
            Some(ts("2025-11-14T10:30:00Z")),
            |p| p.timestamp,
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].timestamp, ts("2025-11-14T10:00:00Z"));
    }

    #[test]
    fn test_filter_by_window_unbounded_passes_everything() {
        let series = vec![point("2025-11-14T09:00:00Z"), point("2025-11-14T11:00:00Z")];
        assert_eq!(filter_by_window(series, None, None, |p| p.timestamp).len(), 2);
    }

    #[test]
    fn test_filter_top_errors_window_overlap() {
        let errors = vec![
            top_error("old", "2025-11-01T00:00:00Z", "2025-11-02T00:00:00Z", "unresolved"),
            top_error("live", "2025-11-10T00:00:00Z", "2025-11-14T00:00:00Z", "unresolved"),
        ];
        let filtered = filter_top_errors(
            errors,
            10,
            Some(ts("2025-11-05T00:00:00Z")),
            None,
            None,
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].fingerprint, "live");
    }

    #[test]
    fn test_filter_top_errors_status_and_limit() {
        let errors = vec![
            top_error("a", "2025-11-10T00:00:00Z", "2025-11-14T00:00:00Z", "unresolved"),
            top_error("b", "2025-11-10T00:00:00Z", "2025-11-14T00:00:00Z", "resolved"),
            top_error("c", "2025-11-10T00:00:00Z", "2025-11-14T00:00:00Z", "unresolved"),
        ];
        let filtered = filter_top_errors(errors, 1, None, None, Some("unresolved"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].fingerprint, "a");
    }
}
