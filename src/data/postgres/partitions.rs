//! Monthly range partitions for the logs and ingestion-metrics tables
//!
//! Partition names are stable: `logs_YYYY_MM` / `ingestion_metrics_YYYY_MM`,
//! each covering `[first of month 00:00:00Z, first of next month)`. The
//! storage worker creates partitions lazily ahead of wall clock; creation is
//! idempotent DDL, and verified names are cached so steady-state flushes skip
//! the DDL round-trip entirely.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;

use super::error::PostgresError;
use crate::utils::time::{first_of_month, first_of_next_month};

pub const LOGS_TABLE: &str = "logs";
pub const INGESTION_METRICS_TABLE: &str = "ingestion_metrics";

/// `{table}_{YYYY}_{MM}`
pub fn partition_name(table: &str, year: i32, month: u32) -> String {
    format!("{}_{:04}_{:02}", table, year, month)
}

/// Partition holding rows with the given timestamp
pub fn partition_for_timestamp(table: &str, ts: DateTime<Utc>) -> String {
    partition_name(table, ts.year(), ts.month())
}

/// `[first day of month, first day of next month)`
pub fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    (start, first_of_next_month(start))
}

/// Parse `{table}_{YYYY}_{MM}` back into (year, month)
pub fn parse_partition_suffix(table: &str, name: &str) -> Option<(i32, u32)> {
    let suffix = name.strip_prefix(table)?.strip_prefix('_')?;
    let (year, month) = suffix.split_once('_')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

pub struct PartitionManager {
    pool: PgPool,
    /// Partition names already confirmed to exist
    verified: RwLock<HashSet<String>>,
}

impl PartitionManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            verified: RwLock::new(HashSet::new()),
        }
    }

    /// Ensure the partition covering `ts` exists
    pub async fn ensure_for_timestamp(
        &self,
        table: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), PostgresError> {
        self.ensure_month(table, ts.year(), ts.month()).await
    }

    /// Idempotently create one monthly partition
    pub async fn ensure_month(
        &self,
        table: &str,
        year: i32,
        month: u32,
    ) -> Result<(), PostgresError> {
        let name = partition_name(table, year, month);

        if self.verified.read().contains(&name) {
            return Ok(());
        }

        let (start, end) = month_bounds(year, month);

        // Identifiers come from compile-time table constants and validated
        // year/month values, never from request input.
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {name} PARTITION OF {table} \
             FOR VALUES FROM ('{start}') TO ('{end}')"
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        self.verified.write().insert(name.clone());
        tracing::info!(partition = %name, from = %start, to = %end, "Partition ensured");
        Ok(())
    }

    /// Ensure partitions from the current month through `months_ahead` more
    pub async fn ensure_ahead(&self, table: &str, months_ahead: u32) -> Result<(), PostgresError> {
        let mut month_start = first_of_month(Utc::now().date_naive());
        for _ in 0..=months_ahead {
            self.ensure_month(table, month_start.year(), month_start.month())
                .await?;
            month_start = first_of_next_month(month_start);
        }
        Ok(())
    }

    /// Existing partitions of `table`, as (name, year, month)
    pub async fn list_partitions(
        &self,
        table: &str,
    ) -> Result<Vec<(String, i32, u32)>, PostgresError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tablename FROM pg_tables \
             WHERE schemaname = 'public' AND tablename LIKE $1",
        )
        .bind(format!("{table}\\_%"))
        .fetch_all(&self.pool)
        .await?;

        let mut partitions: Vec<(String, i32, u32)> = rows
            .into_iter()
            .filter_map(|(name,)| {
                parse_partition_suffix(table, &name).map(|(y, m)| (name, y, m))
            })
            .collect();
        partitions.sort();
        Ok(partitions)
    }

    /// Drop partitions whose entire month range lies strictly before
    /// `cutoff`. Returns the dropped partition names.
    pub async fn drop_older_than(
        &self,
        table: &str,
        cutoff: NaiveDate,
    ) -> Result<Vec<String>, PostgresError> {
        let mut dropped = Vec::new();

        for (name, year, month) in self.list_partitions(table).await? {
            let (_, month_end) = month_bounds(year, month);
            if month_end <= cutoff {
                let ddl = format!("DROP TABLE IF EXISTS {name}");
                sqlx::query(&ddl).execute(&self.pool).await?;
                self.verified.write().remove(&name);
                tracing::info!(partition = %name, cutoff = %cutoff, "Dropped expired partition");
                dropped.push(name);
            }
        }

        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_is_stable() {
        assert_eq!(partition_name(LOGS_TABLE, 2025, 11), "logs_2025_11");
        assert_eq!(partition_name(LOGS_TABLE, 2026, 1), "logs_2026_01");
        assert_eq!(
            partition_name(INGESTION_METRICS_TABLE, 2025, 7),
            "ingestion_metrics_2025_07"
        );
    }

    #[test]
    fn test_partition_for_timestamp() {
        let ts: DateTime<Utc> = "2025-11-14T10:00:00Z".parse().unwrap();
        assert_eq!(partition_for_timestamp(LOGS_TABLE, ts), "logs_2025_11");
    }

    #[test]
    fn test_month_bounds_year_rollover() {
        let (start, end) = month_bounds(2025, 12);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn test_parse_partition_suffix_roundtrip() {
        assert_eq!(
            parse_partition_suffix(LOGS_TABLE, "logs_2025_11"),
            Some((2025, 11))
        );
        assert_eq!(
            parse_partition_suffix(INGESTION_METRICS_TABLE, "ingestion_metrics_2025_02"),
            Some((2025, 2))
        );
        assert_eq!(parse_partition_suffix(LOGS_TABLE, "logs_2025_13"), None);
        assert_eq!(parse_partition_suffix(LOGS_TABLE, "logs_default"), None);
        assert_eq!(parse_partition_suffix(LOGS_TABLE, "error_groups"), None);
    }
}
