//! Identity-database reads
//!
//! The identity database belongs to the account service; this module is the
//! only place the core touches it, and only ever with SELECTs: API-key
//! resolution (joined with project quotas) and the retention ceiling used by
//! the partition sweeper.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::data::postgres::error::PostgresError;

/// Raw identity row behind a credential lookup
#[derive(Debug, Clone)]
pub struct ApiKeyRow {
    pub project_id: i64,
    pub account_id: Option<i64>,
    pub daily_quota: i64,
    pub retention_days: i32,
    pub rate_limit_per_minute: i32,
    pub rate_limit_per_hour: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ApiKeyRow {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Look up an API key by its stored hash. Returns the row regardless of
/// status; the caller decides whether revoked keys are a permanent rejection.
pub async fn lookup_api_key(
    pool: &PgPool,
    key_hash: &str,
) -> Result<Option<ApiKeyRow>, PostgresError> {
    let row = sqlx::query(
        r#"
        SELECT k.project_id, p.account_id, p.daily_quota, p.retention_days,
               k.rate_limit_per_minute, k.rate_limit_per_hour, k.status, k.created_at
        FROM api_keys k
        JOIN projects p ON p.id = k.project_id
        WHERE k.key_hash = $1
        "#,
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_key).transpose().map_err(Into::into)
}

/// Largest retention across all projects. Partitions are not per-tenant, so
/// the sweeper drops a month only once the coarsest tenant is done with it.
pub async fn max_retention_days(pool: &PgPool, fallback: i64) -> Result<i64, PostgresError> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(retention_days)::BIGINT FROM projects")
            .fetch_one(pool)
            .await?;
    Ok(row.0.unwrap_or(fallback))
}

/// Per-project daily quotas, for the usage-stats pre-aggregation
pub async fn project_quotas(pool: &PgPool) -> Result<Vec<(i64, i64)>, PostgresError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT id, daily_quota FROM projects")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

fn row_to_key(row: &PgRow) -> Result<ApiKeyRow, sqlx::Error> {
    Ok(ApiKeyRow {
        project_id: row.try_get("project_id")?,
        account_id: row.try_get("account_id")?,
        daily_quota: row.try_get("daily_quota")?,
        retention_days: row.try_get("retention_days")?,
        rate_limit_per_minute: row.try_get("rate_limit_per_minute")?,
        rate_limit_per_hour: row.try_get("rate_limit_per_hour")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}
