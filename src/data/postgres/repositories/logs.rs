//! Logs repository
//!
//! Writes go through `COPY ... FROM STDIN (FORMAT csv)`, the streaming bulk
//! path, with a single-row INSERT fallback used by the worker's
//! split-and-retry handling. Reads always constrain `timestamp` so the
//! planner prunes to the overlapping monthly partitions.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolCopyExt, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::data::postgres::error::PostgresError;
use crate::domain::events::types::{Importance, InvalidEnumValue, LogLevel, LogType};
use crate::domain::events::{QueuedEvent, StoredLogEvent};

const LOG_COLUMNS: &str = "id, project_id, timestamp, ingested_at, level, log_type, importance, \
     environment, release, message, error_type, error_message, stack_trace, attributes, \
     sdk_version, platform, platform_version, error_fingerprint";

const COPY_STATEMENT: &str = "COPY logs (project_id, timestamp, ingested_at, level, log_type, \
     importance, environment, release, message, error_type, error_message, stack_trace, \
     attributes, sdk_version, platform, platform_version, error_fingerprint) \
     FROM STDIN (FORMAT csv)";

/// Filters for a log query. `start_time`/`end_time` are always present (the
/// API layer default-bounds unbounded queries); `after` switches pagination
/// from OFFSET to keyset on `(timestamp, id)`.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub level: Option<LogLevel>,
    pub log_type: Option<LogType>,
    pub environment: Option<String>,
    pub error_fingerprint: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub after: Option<(DateTime<Utc>, i64)>,
}

#[derive(Debug)]
pub struct LogPage {
    pub logs: Vec<StoredLogEvent>,
    pub total: i64,
    pub has_more: bool,
}

/// Stream a batch into the logs table. Rows land in whichever monthly
/// partitions their timestamps map to; partitions must already exist.
pub async fn bulk_insert(pool: &PgPool, events: &[QueuedEvent]) -> Result<u64, PostgresError> {
    if events.is_empty() {
        return Ok(0);
    }

    let mut copy = pool.copy_in_raw(COPY_STATEMENT).await?;

    let mut buf = String::with_capacity(events.len() * 256);
    for event in events {
        write_csv_row(&mut buf, event);
    }

    if let Err(e) = copy.send(buf.as_bytes()).await {
        // Abort is best-effort; surface the original error
        let _ = copy.abort("bulk insert failed").await;
        return Err(e.into());
    }

    Ok(copy.finish().await?)
}

/// Single-row fallback for split-and-retry after a failed COPY.
/// Returns the assigned log id.
pub async fn insert_single(pool: &PgPool, event: &QueuedEvent) -> Result<i64, PostgresError> {
    let row = sqlx::query(
        "INSERT INTO logs (project_id, timestamp, ingested_at, level, log_type, importance, \
         environment, release, message, error_type, error_message, stack_trace, attributes, \
         sdk_version, platform, platform_version, error_fingerprint) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         RETURNING id",
    )
    .bind(event.project_id)
    .bind(event.timestamp)
    .bind(event.ingested_at)
    .bind(event.level.as_str())
    .bind(event.log_type.as_str())
    .bind(event.importance.as_str())
    .bind(event.environment.as_deref())
    .bind(event.release.as_deref())
    .bind(event.message.as_deref())
    .bind(event.error_type.as_deref())
    .bind(event.error_message.as_deref())
    .bind(event.stack_trace.as_deref())
    .bind(event.attributes.clone())
    .bind(event.sdk_version.as_deref())
    .bind(event.platform.as_deref())
    .bind(event.platform_version.as_deref())
    .bind(event.error_fingerprint.as_deref())
    .fetch_one(pool)
    .await?;

    Ok(row.try_get("id")?)
}

pub async fn query_logs(
    pool: &PgPool,
    project_id: i64,
    filter: &LogFilter,
) -> Result<LogPage, PostgresError> {
    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM logs");
    push_filters(&mut count_qb, project_id, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM logs"));
    push_filters(&mut qb, project_id, filter);

    if let Some((ts, id)) = filter.after {
        qb.push(" AND (timestamp, id) < (");
        qb.push_bind(ts);
        qb.push(", ");
        qb.push_bind(id);
        qb.push(")");
    }

    qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
    // One extra row decides has_more
    qb.push_bind(filter.limit + 1);
    if filter.after.is_none() && filter.offset > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset);
    }

    let rows = qb.build().fetch_all(pool).await?;
    let has_more = rows.len() as i64 > filter.limit;

    let mut logs = Vec::with_capacity(rows.len().min(filter.limit as usize));
    for row in rows.iter().take(filter.limit as usize) {
        logs.push(row_to_event(row)?);
    }

    Ok(LogPage {
        logs,
        total,
        has_more,
    })
}

/// Substring search over message, error_message and error_type, with the
/// same time bounding (and therefore partition pruning) as `query_logs`
pub async fn search_logs(
    pool: &PgPool,
    project_id: i64,
    query_text: &str,
    filter: &LogFilter,
) -> Result<LogPage, PostgresError> {
    let pattern = format!("%{}%", escape_like(query_text));

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM logs");
    push_filters(&mut count_qb, project_id, filter);
    push_search(&mut count_qb, &pattern);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM logs"));
    push_filters(&mut qb, project_id, filter);
    push_search(&mut qb, &pattern);
    qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
    qb.push_bind(filter.limit + 1);
    if filter.offset > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset);
    }

    let rows = qb.build().fetch_all(pool).await?;
    let has_more = rows.len() as i64 > filter.limit;

    let mut logs = Vec::with_capacity(rows.len().min(filter.limit as usize));
    for row in rows.iter().take(filter.limit as usize) {
        logs.push(row_to_event(row)?);
    }

    Ok(LogPage {
        logs,
        total,
        has_more,
    })
}

pub async fn get_log(
    pool: &PgPool,
    project_id: i64,
    log_id: i64,
) -> Result<Option<StoredLogEvent>, PostgresError> {
    let row = sqlx::query(&format!(
        "SELECT {LOG_COLUMNS} FROM logs WHERE id = $1 AND project_id = $2"
    ))
    .bind(log_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_event).transpose().map_err(Into::into)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, project_id: i64, filter: &LogFilter) {
    qb.push(" WHERE project_id = ");
    qb.push_bind(project_id);
    qb.push(" AND timestamp >= ");
    qb.push_bind(filter.start_time);
    qb.push(" AND timestamp < ");
    qb.push_bind(filter.end_time);

    if let Some(level) = filter.level {
        qb.push(" AND level = ");
        qb.push_bind(level.as_str());
    }
    if let Some(log_type) = filter.log_type {
        qb.push(" AND log_type = ");
        qb.push_bind(log_type.as_str());
    }
    if let Some(ref environment) = filter.environment {
        qb.push(" AND environment = ");
        qb.push_bind(environment.clone());
    }
    if let Some(ref fingerprint) = filter.error_fingerprint {
        qb.push(" AND error_fingerprint = ");
        qb.push_bind(fingerprint.clone());
    }
}

fn push_search(qb: &mut QueryBuilder<'_, Postgres>, pattern: &str) {
    qb.push(" AND (message ILIKE ");
    qb.push_bind(pattern.to_string());
    qb.push(" OR error_message ILIKE ");
    qb.push_bind(pattern.to_string());
    qb.push(" OR error_type ILIKE ");
    qb.push_bind(pattern.to_string());
    qb.push(")");
}

fn row_to_event(row: &PgRow) -> Result<StoredLogEvent, sqlx::Error> {
    Ok(StoredLogEvent {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        timestamp: row.try_get("timestamp")?,
        ingested_at: row.try_get("ingested_at")?,
        level: parse_enum_column(row, "level")?,
        log_type: parse_enum_column(row, "log_type")?,
        importance: parse_enum_column(row, "importance")?,
        environment: row.try_get("environment")?,
        release: row.try_get("release")?,
        message: row.try_get("message")?,
        error_type: row.try_get("error_type")?,
        error_message: row.try_get("error_message")?,
        stack_trace: row.try_get("stack_trace")?,
        attributes: row.try_get("attributes")?,
        sdk_version: row.try_get("sdk_version")?,
        platform: row.try_get("platform")?,
        platform_version: row.try_get("platform_version")?,
        error_fingerprint: row.try_get("error_fingerprint")?,
    })
}

fn parse_enum_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = InvalidEnumValue>,
{
    let text: String = row.try_get(column)?;
    text.parse()
        .map_err(|e: InvalidEnumValue| sqlx::Error::Decode(Box::new(e)))
}

/// Escape LIKE metacharacters in user-supplied search text
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// =============================================================================
// CSV encoding for COPY
// =============================================================================

fn write_csv_row(buf: &mut String, event: &QueuedEvent) {
    push_num(buf, event.project_id);
    push_str(buf, Some(&event.timestamp.to_rfc3339()));
    push_str(buf, Some(&event.ingested_at.to_rfc3339()));
    push_str(buf, Some(event.level.as_str()));
    push_str(buf, Some(event.log_type.as_str()));
    push_str(buf, Some(event.importance.as_str()));
    push_str(buf, event.environment.as_deref());
    push_str(buf, event.release.as_deref());
    push_str(buf, event.message.as_deref());
    push_str(buf, event.error_type.as_deref());
    push_str(buf, event.error_message.as_deref());
    push_str(buf, event.stack_trace.as_deref());
    let attributes = event
        .attributes
        .as_ref()
        .map(|a| serde_json::to_string(a).unwrap_or_else(|_| "null".to_string()));
    push_str(buf, attributes.as_deref());
    push_str(buf, event.sdk_version.as_deref());
    push_str(buf, event.platform.as_deref());
    push_str(buf, event.platform_version.as_deref());
    push_last(buf, event.error_fingerprint.as_deref());
}

fn push_num(buf: &mut String, value: i64) {
    buf.push_str(&value.to_string());
    buf.push(',');
}

/// Quoted CSV field; an absent value becomes an unquoted empty field, which
/// COPY csv reads as NULL
fn push_str(buf: &mut String, value: Option<&str>) {
    push_field(buf, value);
    buf.push(',');
}

fn push_last(buf: &mut String, value: Option<&str>) {
    push_field(buf, value);
    buf.push('\n');
}

fn push_field(buf: &mut String, value: Option<&str>) {
    if let Some(value) = value {
        buf.push('"');
        for ch in value.chars() {
            if ch == '"' {
                buf.push('"');
            }
            buf.push(ch);
        }
        buf.push('"');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::types::{Importance, LogLevel, LogType};
    use serde_json::json;

    fn sample_event() -> QueuedEvent {
        QueuedEvent {
            project_id: 7,
            timestamp: "2025-11-14T10:00:00Z".parse().unwrap(),
            ingested_at: "2025-11-14T10:00:01Z".parse().unwrap(),
            level: LogLevel::Info,
            log_type: LogType::Console,
            importance: Importance::Standard,
            environment: None,
            release: None,
            message: Some("hello".into()),
            error_type: None,
            error_message: None,
            stack_trace: None,
            attributes: None,
            sdk_version: None,
            platform: None,
            platform_version: None,
            error_fingerprint: None,
            enqueued_at: "2025-11-14T10:00:01Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_csv_row_null_vs_empty() {
        let mut event = sample_event();
        event.environment = Some(String::new());

        let mut buf = String::new();
        write_csv_row(&mut buf, &event);

        // Absent release renders as unquoted empty (NULL); present-but-empty
        // environment renders as a quoted empty string
        assert!(buf.contains(",\"\",,"), "expected quoted empty then NULL: {buf}");
        assert!(buf.ends_with('\n'));
        assert_eq!(buf.matches(',').count(), 16);
    }

    #[test]
    fn test_csv_quotes_doubled() {
        let mut event = sample_event();
        event.message = Some("say \"hi\", twice".into());

        let mut buf = String::new();
        write_csv_row(&mut buf, &event);
        assert!(buf.contains("\"say \"\"hi\"\", twice\""));
    }

    #[test]
    fn test_csv_preserves_newlines_in_field() {
        let mut event = sample_event();
        event.stack_trace = Some("line one\nline two".into());

        let mut buf = String::new();
        write_csv_row(&mut buf, &event);
        assert!(buf.contains("\"line one\nline two\""));
    }

    #[test]
    fn test_csv_attributes_serialized() {
        let mut event = sample_event();
        event.attributes = Some(json!({"a": 1}));

        let mut buf = String::new();
        write_csv_row(&mut buf, &event);
        assert!(buf.contains("{\"\"a\"\":1}"), "json quotes doubled in csv: {buf}");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("plain"), "plain");
    }
}
