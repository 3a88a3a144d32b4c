//! Error group repository
//!
//! One row per `(project_id, fingerprint)`. The upsert keeps the aggregate
//! invariants in SQL: `occurrence_count` only grows, `first_seen` only
//! shrinks, `last_seen` only grows, and the sample columns are written on
//! insert and never touched by the update arm.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::data::postgres::error::PostgresError;

/// Per-fingerprint contribution of one flushed batch
#[derive(Debug, Clone)]
pub struct ErrorGroupUpsert {
    pub project_id: i64,
    pub fingerprint: String,
    pub error_type: String,
    pub error_message: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: i64,
    pub sample_stack_trace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ErrorGroupRow {
    pub project_id: i64,
    pub fingerprint: String,
    pub error_type: String,
    pub error_message: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: i64,
    pub status: String,
    pub sample_log_id: Option<i64>,
}

pub async fn upsert(pool: &PgPool, group: &ErrorGroupUpsert) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO error_groups (
            project_id, fingerprint, error_type, error_message,
            first_seen, last_seen, occurrence_count, status, sample_stack_trace
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'unresolved', $8)
        ON CONFLICT (project_id, fingerprint) DO UPDATE SET
            occurrence_count = error_groups.occurrence_count + EXCLUDED.occurrence_count,
            first_seen = LEAST(error_groups.first_seen, EXCLUDED.first_seen),
            last_seen = GREATEST(error_groups.last_seen, EXCLUDED.last_seen),
            updated_at = NOW()
        "#,
    )
    .bind(group.project_id)
    .bind(&group.fingerprint)
    .bind(&group.error_type)
    .bind(group.error_message.as_deref())
    .bind(group.first_seen)
    .bind(group.last_seen)
    .bind(group.occurrences)
    .bind(group.sample_stack_trace.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_batch(
    pool: &PgPool,
    groups: &[ErrorGroupUpsert],
) -> Result<(), PostgresError> {
    for group in groups {
        upsert(pool, group).await?;
    }
    Ok(())
}

/// Fill `sample_log_id` for groups that do not have one yet, pointing at the
/// earliest persisted log carrying the fingerprint. Write-once: rows with a
/// sample already set are untouched.
pub async fn backfill_sample_log_ids(
    pool: &PgPool,
    project_id: i64,
    fingerprints: &[String],
) -> Result<u64, PostgresError> {
    if fingerprints.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE error_groups eg
        SET sample_log_id = (
            SELECT l.id FROM logs l
            WHERE l.project_id = eg.project_id
              AND l.error_fingerprint = eg.fingerprint
            ORDER BY l.timestamp ASC, l.id ASC
            LIMIT 1
        )
        WHERE eg.project_id = $1
          AND eg.fingerprint = ANY($2)
          AND eg.sample_log_id IS NULL
        "#,
    )
    .bind(project_id)
    .bind(fingerprints)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Unresolved groups last seen in the window, ordered for the top-errors
/// pre-aggregation (per project, most frequent first)
pub async fn unresolved_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<ErrorGroupRow>, PostgresError> {
    let rows = sqlx::query(
        r#"
        SELECT project_id, fingerprint, error_type, error_message,
               first_seen, last_seen, occurrence_count, status, sample_log_id
        FROM error_groups
        WHERE status = 'unresolved' AND last_seen > $1
        ORDER BY project_id, occurrence_count DESC
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_group).collect::<Result<_, _>>().map_err(Into::into)
}

fn row_to_group(row: &PgRow) -> Result<ErrorGroupRow, sqlx::Error> {
    Ok(ErrorGroupRow {
        project_id: row.try_get("project_id")?,
        fingerprint: row.try_get("fingerprint")?,
        error_type: row.try_get("error_type")?,
        error_message: row.try_get("error_message")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        occurrence_count: row.try_get("occurrence_count")?,
        status: row.try_get("status")?,
        sample_log_id: row.try_get("sample_log_id")?,
    })
}
