//! Logs-database schema migrations
//!
//! Versioned, forward-only. Monthly partitions of `logs` and
//! `ingestion_metrics` are NOT created here; the storage worker owns
//! partition creation (lazily ahead of wall clock), so a fresh deployment is
//! writable the moment the first worker flush runs.

use sqlx::PgPool;

use super::error::PostgresError;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_logs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS logs (
                id BIGINT GENERATED ALWAYS AS IDENTITY,
                project_id BIGINT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                ingested_at TIMESTAMPTZ NOT NULL,
                level TEXT NOT NULL,
                log_type TEXT NOT NULL,
                importance TEXT NOT NULL,
                environment TEXT,
                release TEXT,
                message TEXT,
                error_type TEXT,
                error_message TEXT,
                stack_trace TEXT,
                attributes JSONB,
                sdk_version TEXT,
                platform TEXT,
                platform_version TEXT,
                error_fingerprint TEXT,
                PRIMARY KEY (id, timestamp)
            ) PARTITION BY RANGE (timestamp);

            CREATE INDEX IF NOT EXISTS idx_logs_project_time
                ON logs (project_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_logs_project_level
                ON logs (project_id, level, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_logs_fingerprint
                ON logs (project_id, error_fingerprint)
                WHERE error_fingerprint IS NOT NULL;
        "#,
    },
    Migration {
        version: 2,
        name: "create_error_groups",
        sql: r#"
            CREATE TABLE IF NOT EXISTS error_groups (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                project_id BIGINT NOT NULL,
                fingerprint TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT,
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                occurrence_count BIGINT NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'unresolved',
                sample_log_id BIGINT,
                sample_stack_trace TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (project_id, fingerprint)
            );

            CREATE INDEX IF NOT EXISTS idx_error_groups_project_seen
                ON error_groups (project_id, last_seen DESC);
            CREATE INDEX IF NOT EXISTS idx_error_groups_project_count
                ON error_groups (project_id, occurrence_count DESC);
        "#,
    },
    Migration {
        version: 3,
        name: "create_aggregated_metrics",
        sql: r#"
            CREATE TABLE IF NOT EXISTS aggregated_metrics (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                project_id BIGINT NOT NULL,
                date VARCHAR(8) NOT NULL,
                hour SMALLINT NOT NULL,
                metric_type TEXT NOT NULL,
                endpoint_method TEXT,
                endpoint_path TEXT,
                log_level TEXT,
                log_type TEXT,
                log_count BIGINT NOT NULL DEFAULT 0,
                error_count BIGINT NOT NULL DEFAULT 0,
                avg_duration_ms DOUBLE PRECISION,
                min_duration_ms INTEGER,
                max_duration_ms INTEGER,
                p95_duration_ms INTEGER,
                p99_duration_ms INTEGER,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE UNIQUE INDEX IF NOT EXISTS uq_aggregated_metrics_bucket
                ON aggregated_metrics (
                    project_id, date, hour, metric_type,
                    COALESCE(endpoint_method, ''),
                    COALESCE(endpoint_path, ''),
                    COALESCE(log_level, ''),
                    COALESCE(log_type, '')
                );
        "#,
    },
    Migration {
        version: 4,
        name: "create_ingestion_metrics",
        sql: r#"
            CREATE TABLE IF NOT EXISTS ingestion_metrics (
                id BIGINT GENERATED ALWAYS AS IDENTITY,
                worker_id INTEGER NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                flushed BIGINT NOT NULL,
                failed BIGINT NOT NULL,
                queue_depth BIGINT NOT NULL,
                flush_ms BIGINT NOT NULL,
                PRIMARY KEY (id, recorded_at)
            ) PARTITION BY RANGE (recorded_at);
        "#,
    },
    Migration {
        version: 5,
        name: "create_dead_letter_logs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS dead_letter_logs (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                project_id BIGINT,
                payload BYTEA NOT NULL,
                reason TEXT NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
        "#,
    },
];

pub async fn run(pool: &PgPool) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let applied: Option<(i32,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;

        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| PostgresError::MigrationFailed {
                version: migration.version,
                name: migration.name.to_string(),
                error: e.to_string(),
            })?;

        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied logs-database migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_sequential_and_unique() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as i32 + 1, "migration {} out of order", m.name);
        }
    }

    #[test]
    fn test_logs_schema_is_partitioned() {
        let logs = MIGRATIONS.iter().find(|m| m.name == "create_logs").unwrap();
        assert!(logs.sql.contains("PARTITION BY RANGE (timestamp)"));
        assert!(logs.sql.contains("PRIMARY KEY (id, timestamp)"));
    }
}
