//! Metrics repositories: ingestion throughput rows, hourly rollups into
//! `aggregated_metrics`, and the scan queries feeding the pre-aggregation
//! jobs.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::data::postgres::error::PostgresError;

// =============================================================================
// Ingestion metrics (worker throughput/latency samples)
// =============================================================================

#[derive(Debug, Clone)]
pub struct IngestionMetric {
    pub worker_id: i32,
    pub recorded_at: DateTime<Utc>,
    pub flushed: i64,
    pub failed: i64,
    pub queue_depth: i64,
    pub flush_ms: i64,
}

pub async fn insert_ingestion_metric(
    pool: &PgPool,
    metric: &IngestionMetric,
) -> Result<(), PostgresError> {
    sqlx::query(
        "INSERT INTO ingestion_metrics (worker_id, recorded_at, flushed, failed, queue_depth, flush_ms) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(metric.worker_id)
    .bind(metric.recorded_at)
    .bind(metric.flushed)
    .bind(metric.failed)
    .bind(metric.queue_depth)
    .bind(metric.flush_ms)
    .execute(pool)
    .await?;
    Ok(())
}

// =============================================================================
// Hourly rollups (aggregated_metrics)
// =============================================================================

/// Endpoint metrics for one completed hour, keyed by method+path, with
/// latency percentiles from `attributes->endpoint->duration_ms`
pub async fn rollup_endpoint_metrics(
    pool: &PgPool,
    date: &str,
    hour: i16,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO aggregated_metrics (
            project_id, date, hour, metric_type,
            endpoint_method, endpoint_path, log_level, log_type,
            log_count, error_count,
            avg_duration_ms, min_duration_ms, max_duration_ms,
            p95_duration_ms, p99_duration_ms
        )
        SELECT
            project_id,
            $1 AS date,
            $2 AS hour,
            'endpoint' AS metric_type,
            (attributes->'endpoint'->>'method')::TEXT AS endpoint_method,
            (attributes->'endpoint'->>'path')::TEXT AS endpoint_path,
            NULL AS log_level,
            NULL AS log_type,
            COUNT(*) AS log_count,
            COUNT(*) FILTER (
                WHERE (attributes->'endpoint'->>'status_code')::INTEGER >= 400
            ) AS error_count,
            AVG((attributes->'endpoint'->>'duration_ms')::FLOAT) AS avg_duration_ms,
            ROUND(MIN((attributes->'endpoint'->>'duration_ms')::FLOAT))::INTEGER AS min_duration_ms,
            ROUND(MAX((attributes->'endpoint'->>'duration_ms')::FLOAT))::INTEGER AS max_duration_ms,
            ROUND(PERCENTILE_CONT(0.95) WITHIN GROUP (
                ORDER BY (attributes->'endpoint'->>'duration_ms')::FLOAT
            )::NUMERIC)::INTEGER AS p95_duration_ms,
            ROUND(PERCENTILE_CONT(0.99) WITHIN GROUP (
                ORDER BY (attributes->'endpoint'->>'duration_ms')::FLOAT
            )::NUMERIC)::INTEGER AS p99_duration_ms
        FROM logs
        WHERE log_type = 'endpoint'
          AND timestamp >= $3
          AND timestamp < $4
          AND attributes->'endpoint'->>'method' IS NOT NULL
          AND attributes->'endpoint'->>'path' IS NOT NULL
        GROUP BY project_id,
                 attributes->'endpoint'->>'method',
                 attributes->'endpoint'->>'path'
        ON CONFLICT (
            project_id, date, hour, metric_type,
            COALESCE(endpoint_method, ''), COALESCE(endpoint_path, ''),
            COALESCE(log_level, ''), COALESCE(log_type, '')
        )
        DO UPDATE SET
            log_count = EXCLUDED.log_count,
            error_count = EXCLUDED.error_count,
            avg_duration_ms = EXCLUDED.avg_duration_ms,
            min_duration_ms = EXCLUDED.min_duration_ms,
            max_duration_ms = EXCLUDED.max_duration_ms,
            p95_duration_ms = EXCLUDED.p95_duration_ms,
            p99_duration_ms = EXCLUDED.p99_duration_ms,
            updated_at = NOW()
        "#,
    )
    .bind(date)
    .bind(hour)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn rollup_exception_metrics(
    pool: &PgPool,
    date: &str,
    hour: i16,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO aggregated_metrics (
            project_id, date, hour, metric_type,
            endpoint_method, endpoint_path, log_level, log_type,
            log_count, error_count
        )
        SELECT
            project_id, $1, $2, 'exception',
            NULL, NULL, NULL, NULL,
            COUNT(*), COUNT(*)
        FROM logs
        WHERE log_type = 'exception'
          AND timestamp >= $3
          AND timestamp < $4
        GROUP BY project_id
        ON CONFLICT (
            project_id, date, hour, metric_type,
            COALESCE(endpoint_method, ''), COALESCE(endpoint_path, ''),
            COALESCE(log_level, ''), COALESCE(log_type, '')
        )
        DO UPDATE SET
            log_count = EXCLUDED.log_count,
            error_count = EXCLUDED.error_count,
            updated_at = NOW()
        "#,
    )
    .bind(date)
    .bind(hour)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn rollup_log_volume_metrics(
    pool: &PgPool,
    date: &str,
    hour: i16,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<u64, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO aggregated_metrics (
            project_id, date, hour, metric_type,
            endpoint_method, endpoint_path, log_level, log_type,
            log_count, error_count
        )
        SELECT
            project_id, $1, $2, 'log_volume',
            NULL, NULL, level, log_type,
            COUNT(*),
            COUNT(*) FILTER (WHERE level IN ('error', 'critical'))
        FROM logs
        WHERE timestamp >= $3
          AND timestamp < $4
        GROUP BY project_id, level, log_type
        ON CONFLICT (
            project_id, date, hour, metric_type,
            COALESCE(endpoint_method, ''), COALESCE(endpoint_path, ''),
            COALESCE(log_level, ''), COALESCE(log_type, '')
        )
        DO UPDATE SET
            log_count = EXCLUDED.log_count,
            error_count = EXCLUDED.error_count,
            updated_at = NOW()
        "#,
    )
    .bind(date)
    .bind(hour)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Aggregated metrics read path
// =============================================================================

#[derive(Debug, Clone, serde::Serialize)]
pub struct AggregatedMetricRow {
    pub project_id: i64,
    pub date: String,
    pub hour: i16,
    pub metric_type: String,
    pub endpoint_method: Option<String>,
    pub endpoint_path: Option<String>,
    pub log_level: Option<String>,
    pub log_type: Option<String>,
    pub log_count: i64,
    pub error_count: i64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<i32>,
    pub max_duration_ms: Option<i32>,
    pub p95_duration_ms: Option<i32>,
    pub p99_duration_ms: Option<i32>,
}

pub async fn query_aggregated(
    pool: &PgPool,
    project_id: i64,
    metric_type: Option<&str>,
    date_from: &str,
    date_to: &str,
) -> Result<Vec<AggregatedMetricRow>, PostgresError> {
    let rows = match metric_type {
        Some(metric_type) => {
            sqlx::query(
                "SELECT project_id, date, hour, metric_type, endpoint_method, endpoint_path, \
                 log_level, log_type, log_count, error_count, avg_duration_ms, min_duration_ms, \
                 max_duration_ms, p95_duration_ms, p99_duration_ms \
                 FROM aggregated_metrics \
                 WHERE project_id = $1 AND metric_type = $2 AND date >= $3 AND date <= $4 \
                 ORDER BY date, hour",
            )
            .bind(project_id)
            .bind(metric_type)
            .bind(date_from)
            .bind(date_to)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT project_id, date, hour, metric_type, endpoint_method, endpoint_path, \
                 log_level, log_type, log_count, error_count, avg_duration_ms, min_duration_ms, \
                 max_duration_ms, p95_duration_ms, p99_duration_ms \
                 FROM aggregated_metrics \
                 WHERE project_id = $1 AND date >= $2 AND date <= $3 \
                 ORDER BY date, hour, metric_type",
            )
            .bind(project_id)
            .bind(date_from)
            .bind(date_to)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_metric).collect::<Result<_, _>>().map_err(Into::into)
}

fn row_to_metric(row: &PgRow) -> Result<AggregatedMetricRow, sqlx::Error> {
    Ok(AggregatedMetricRow {
        project_id: row.try_get("project_id")?,
        date: row.try_get("date")?,
        hour: row.try_get("hour")?,
        metric_type: row.try_get("metric_type")?,
        endpoint_method: row.try_get("endpoint_method")?,
        endpoint_path: row.try_get("endpoint_path")?,
        log_level: row.try_get("log_level")?,
        log_type: row.try_get("log_type")?,
        log_count: row.try_get("log_count")?,
        error_count: row.try_get("error_count")?,
        avg_duration_ms: row.try_get("avg_duration_ms")?,
        min_duration_ms: row.try_get("min_duration_ms")?,
        max_duration_ms: row.try_get("max_duration_ms")?,
        p95_duration_ms: row.try_get("p95_duration_ms")?,
        p99_duration_ms: row.try_get("p99_duration_ms")?,
    })
}

// =============================================================================
// Pre-aggregation scan queries
// =============================================================================

/// `(project_id, bucket_start, error_count, critical_count)` in 5-minute
/// buckets over `[since, until)`
pub async fn error_rate_series(
    pool: &PgPool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<(i64, DateTime<Utc>, i64, i64)>, PostgresError> {
    let rows: Vec<(i64, DateTime<Utc>, i64, i64)> = sqlx::query_as(
        r#"
        SELECT
            project_id,
            date_trunc('minute', timestamp)
                - (EXTRACT(minute FROM timestamp)::int % 5) * INTERVAL '1 minute' AS bucket,
            COUNT(*) FILTER (WHERE level = 'error') AS error_count,
            COUNT(*) FILTER (WHERE level = 'critical') AS critical_count
        FROM logs
        WHERE timestamp >= $1 AND timestamp < $2
        GROUP BY project_id, bucket
        ORDER BY project_id, bucket
        "#,
    )
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// `(project_id, hour_bucket, level, count)` over `[since, until)`
pub async fn log_volume_series(
    pool: &PgPool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<(i64, DateTime<Utc>, String, i64)>, PostgresError> {
    let rows: Vec<(i64, DateTime<Utc>, String, i64)> = sqlx::query_as(
        r#"
        SELECT project_id, date_trunc('hour', timestamp) AS bucket, level, COUNT(*)
        FROM logs
        WHERE timestamp >= $1 AND timestamp < $2
        GROUP BY project_id, bucket, level
        ORDER BY project_id, bucket
        "#,
    )
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// `(project_id, day, count)` over `[since, until)`
pub async fn daily_log_counts(
    pool: &PgPool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<(i64, NaiveDate, i64)>, PostgresError> {
    let rows: Vec<(i64, NaiveDate, i64)> = sqlx::query_as(
        r#"
        SELECT project_id, DATE(timestamp) AS day, COUNT(*)
        FROM logs
        WHERE timestamp >= $1 AND timestamp < $2
        GROUP BY project_id, day
        ORDER BY project_id, day
        "#,
    )
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
