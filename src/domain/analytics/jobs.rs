//! Pre-aggregation job bodies
//!
//! Each job rescans its window and overwrites its sink keys, so re-running
//! after a missed tick is always safe. Scans end at `now - lag` to keep
//! in-flight buckets out of the results.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::core::constants::{
    ERROR_RATE_CACHE_TTL_SECS, LOG_VOLUME_CACHE_TTL_SECS, TOP_ERRORS_CACHE_TTL_SECS,
    TOP_ERRORS_LIMIT, USAGE_STATS_CACHE_TTL_SECS,
};
use crate::data::cache::{CacheKey, CacheService};
use crate::data::postgres::error::PostgresError;
use crate::data::postgres::repositories::{credentials, error_groups, metrics};
use crate::utils::time::previous_hour_bounds;

// =============================================================================
// Cached series schemas (written here, read by the query service)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRatePoint {
    pub timestamp: DateTime<Utc>,
    pub error_count: i64,
    pub critical_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogVolumePoint {
    pub timestamp: DateTime<Utc>,
    pub debug: i64,
    pub info: i64,
    pub warning: i64,
    pub error: i64,
    pub critical: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopError {
    pub fingerprint: String,
    pub error_type: String,
    pub error_message: Option<String>,
    pub occurrence_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: String,
    pub sample_log_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePoint {
    pub date: NaiveDate,
    pub log_count: i64,
    pub daily_quota: i64,
    pub quota_used_percent: f64,
}

// =============================================================================
// Jobs
// =============================================================================

/// 5-minute error/critical buckets over the last 24 h, cached per project
pub async fn aggregate_error_rates(
    logs: &PgPool,
    cache: &CacheService,
    lag_secs: i64,
) -> Result<usize, PostgresError> {
    let until = Utc::now() - ChronoDuration::seconds(lag_secs);
    let since = until - ChronoDuration::hours(24);

    let rows = metrics::error_rate_series(logs, since, until).await?;
    let by_project = pivot_error_rates(rows);

    for (project_id, points) in &by_project {
        let key = CacheKey::metrics_error_rate(*project_id);
        if let Err(e) = cache
            .set(&key, points, Some(Duration::from_secs(ERROR_RATE_CACHE_TTL_SECS)))
            .await
        {
            tracing::warn!(project_id, error = %e, "Error rate cache write failed");
        }
    }

    Ok(by_project.len())
}

/// Hourly per-level volumes over the last 24 h, cached per project
pub async fn aggregate_log_volumes(
    logs: &PgPool,
    cache: &CacheService,
    lag_secs: i64,
) -> Result<usize, PostgresError> {
    let until = Utc::now() - ChronoDuration::seconds(lag_secs);
    let since = until - ChronoDuration::hours(24);

    let rows = metrics::log_volume_series(logs, since, until).await?;
    let by_project = pivot_log_volumes(rows);

    for (project_id, points) in &by_project {
        let key = CacheKey::metrics_log_volume(*project_id);
        if let Err(e) = cache
            .set(&key, points, Some(Duration::from_secs(LOG_VOLUME_CACHE_TTL_SECS)))
            .await
        {
            tracing::warn!(project_id, error = %e, "Log volume cache write failed");
        }
    }

    Ok(by_project.len())
}

/// Top unresolved groups seen in the last 24 h, per project
pub async fn compute_top_errors(
    logs: &PgPool,
    cache: &CacheService,
) -> Result<usize, PostgresError> {
    let since = Utc::now() - ChronoDuration::hours(24);
    let groups = error_groups::unresolved_since(logs, since).await?;

    let mut by_project: BTreeMap<i64, Vec<TopError>> = BTreeMap::new();
    for group in groups {
        let entry = by_project.entry(group.project_id).or_default();
        // Rows arrive ordered by occurrence_count per project
        if entry.len() < TOP_ERRORS_LIMIT {
            entry.push(TopError {
                fingerprint: group.fingerprint,
                error_type: group.error_type,
                error_message: group.error_message,
                occurrence_count: group.occurrence_count,
                first_seen: group.first_seen,
                last_seen: group.last_seen,
                status: group.status,
                sample_log_id: group.sample_log_id,
            });
        }
    }

    for (project_id, errors) in &by_project {
        let key = CacheKey::metrics_top_errors(*project_id);
        if let Err(e) = cache
            .set(&key, errors, Some(Duration::from_secs(TOP_ERRORS_CACHE_TTL_SECS)))
            .await
        {
            tracing::warn!(project_id, error = %e, "Top errors cache write failed");
        }
    }

    Ok(by_project.len())
}

/// Per-day usage against the project quota over the last 30 days
pub async fn generate_usage_stats(
    logs: &PgPool,
    identity: &PgPool,
    cache: &CacheService,
    lag_secs: i64,
    default_quota: i64,
) -> Result<usize, PostgresError> {
    let until = Utc::now() - ChronoDuration::seconds(lag_secs);
    let since = until - ChronoDuration::days(30);

    let quotas: HashMap<i64, i64> = credentials::project_quotas(identity)
        .await?
        .into_iter()
        .collect();
    let rows = metrics::daily_log_counts(logs, since, until).await?;
    let by_project = build_usage(rows, &quotas, default_quota);

    for (project_id, usage) in &by_project {
        let key = CacheKey::metrics_usage_stats(*project_id);
        if let Err(e) = cache
            .set(&key, usage, Some(Duration::from_secs(USAGE_STATS_CACHE_TTL_SECS)))
            .await
        {
            tracing::warn!(project_id, error = %e, "Usage stats cache write failed");
        }
    }

    Ok(by_project.len())
}

/// Hourly rollups into `aggregated_metrics` for the last completed hour
pub async fn rollup_hourly_metrics(logs: &PgPool) -> Result<u64, PostgresError> {
    let (start, end) = previous_hour_bounds(Utc::now());
    let date = start.format("%Y%m%d").to_string();
    let hour = start.format("%H").to_string().parse::<i16>().unwrap_or(0);

    let endpoint = metrics::rollup_endpoint_metrics(logs, &date, hour, start, end).await?;
    let exception = metrics::rollup_exception_metrics(logs, &date, hour, start, end).await?;
    let volume = metrics::rollup_log_volume_metrics(logs, &date, hour, start, end).await?;

    tracing::info!(
        date = %date,
        hour,
        endpoint_rows = endpoint,
        exception_rows = exception,
        volume_rows = volume,
        "Hourly rollup complete"
    );
    Ok(endpoint + exception + volume)
}

// =============================================================================
// Pivot helpers
// =============================================================================

fn pivot_error_rates(
    rows: Vec<(i64, DateTime<Utc>, i64, i64)>,
) -> BTreeMap<i64, Vec<ErrorRatePoint>> {
    let mut by_project: BTreeMap<i64, Vec<ErrorRatePoint>> = BTreeMap::new();
    for (project_id, bucket, error_count, critical_count) in rows {
        by_project.entry(project_id).or_default().push(ErrorRatePoint {
            timestamp: bucket,
            error_count,
            critical_count,
        });
    }
    by_project
}

fn pivot_log_volumes(
    rows: Vec<(i64, DateTime<Utc>, String, i64)>,
) -> BTreeMap<i64, Vec<LogVolumePoint>> {
    let mut buckets: BTreeMap<(i64, DateTime<Utc>), LogVolumePoint> = BTreeMap::new();

    for (project_id, bucket, level, count) in rows {
        let point = buckets.entry((project_id, bucket)).or_insert(LogVolumePoint {
            timestamp: bucket,
            debug: 0,
            info: 0,
            warning: 0,
            error: 0,
            critical: 0,
        });
        match level.as_str() {
            "debug" => point.debug = count,
            "info" => point.info = count,
            "warning" => point.warning = count,
            "error" => point.error = count,
            "critical" => point.critical = count,
            other => tracing::warn!(level = other, "Unexpected level in volume scan"),
        }
    }

    let mut by_project: BTreeMap<i64, Vec<LogVolumePoint>> = BTreeMap::new();
    for ((project_id, _), point) in buckets {
        by_project.entry(project_id).or_default().push(point);
    }
    by_project
}

fn build_usage(
    rows: Vec<(i64, NaiveDate, i64)>,
    quotas: &HashMap<i64, i64>,
    default_quota: i64,
) -> BTreeMap<i64, Vec<UsagePoint>> {
    let mut by_project: BTreeMap<i64, Vec<UsagePoint>> = BTreeMap::new();
    for (project_id, date, log_count) in rows {
        let daily_quota = quotas.get(&project_id).copied().unwrap_or(default_quota);
        let quota_used_percent = if daily_quota > 0 {
            (log_count as f64 / daily_quota as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        by_project.entry(project_id).or_default().push(UsagePoint {
            date,
            log_count,
            daily_quota,
            quota_used_percent,
        });
    }
    by_project
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_pivot_error_rates_groups_by_project() {
        let rows = vec![
            (1, ts("2025-11-14T10:00:00Z"), 3, 1),
            (1, ts("2025-11-14T10:05:00Z"), 0, 0),
            (2, ts("2025-11-14T10:00:00Z"), 7, 2),
        ];
        let pivoted = pivot_error_rates(rows);
        assert_eq!(pivoted[&1].len(), 2);
        assert_eq!(pivoted[&2].len(), 1);
        assert_eq!(pivoted[&1][0].error_count, 3);
        assert_eq!(pivoted[&2][0].critical_count, 2);
    }

    #[test]
    fn test_pivot_log_volumes_merges_levels_into_buckets() {
        let bucket = ts("2025-11-14T10:00:00Z");
        let rows = vec![
            (1, bucket, "info".to_string(), 10),
            (1, bucket, "error".to_string(), 2),
            (1, ts("2025-11-14T11:00:00Z"), "debug".to_string(), 5),
        ];
        let pivoted = pivot_log_volumes(rows);
        let points = &pivoted[&1];
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].info, 10);
        assert_eq!(points[0].error, 2);
        assert_eq!(points[0].debug, 0);
        assert_eq!(points[1].debug, 5);
    }

    #[test]
    fn test_build_usage_computes_percent() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 14).unwrap();
        let quotas = HashMap::from([(1, 1000)]);
        let usage = build_usage(vec![(1, date, 250), (2, date, 50)], &quotas, 10_000);

        assert_eq!(usage[&1][0].quota_used_percent, 25.0);
        assert_eq!(usage[&1][0].daily_quota, 1000);
        // Unknown project falls back to the default quota
        assert_eq!(usage[&2][0].daily_quota, 10_000);
        assert_eq!(usage[&2][0].quota_used_percent, 0.5);
    }

    #[test]
    fn test_build_usage_zero_quota() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 14).unwrap();
        let quotas = HashMap::from([(1, 0)]);
        let usage = build_usage(vec![(1, date, 99)], &quotas, 10_000);
        assert_eq!(usage[&1][0].quota_used_percent, 0.0);
    }
}
