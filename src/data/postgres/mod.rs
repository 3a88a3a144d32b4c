//! PostgreSQL database service
//!
//! Two databases back the system: the identity database (read-only here:
//! `projects`, `api_keys`, owned by the account service) and the logs
//! database (owned here: `logs`, `error_groups`, `aggregated_metrics`,
//! `ingestion_metrics`, `dead_letter_logs`). Both get a bounded pool with
//! idle cleanup, connection cycling and a statement timeout.

pub mod error;
mod migrations;
pub mod partitions;
pub mod repositories;

pub use error::PostgresError;
pub use partitions::PartitionManager;
pub use sqlx::PgPool;

use std::sync::Arc;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::PostgresConfig;

pub struct PostgresService {
    pool: PgPool,
    role: &'static str,
}

impl PostgresService {
    /// Connect a pool. `role` labels the database in logs ("identity"/"logs").
    pub async fn connect(config: &PostgresConfig, role: &'static str) -> Result<Self, PostgresError> {
        if config.url.is_empty() {
            return Err(PostgresError::Config(format!(
                "PostgreSQL URL for the {role} database is required"
            )));
        }

        let mut options: PgConnectOptions = config
            .url
            .parse()
            .map_err(|e| PostgresError::Config(format!("Invalid PostgreSQL URL: {e}")))?;

        options = options.log_statements(tracing::log::LevelFilter::Trace);

        if config.statement_timeout_secs > 0 {
            options = options.options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect_with(options)
            .await?;

        tracing::debug!(
            role,
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            statement_timeout_secs = config.statement_timeout_secs,
            "PostgresService connected"
        );

        Ok(Self { pool, role })
    }

    /// Apply the logs-database schema. The identity database is migrated by
    /// its owning service; never call this on the identity pool.
    pub async fn run_logs_migrations(&self) -> Result<(), PostgresError> {
        migrations::run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!(role = self.role, "PostgreSQL pool closed");
    }

    pub fn start_health_check_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!(role = db.role, "PostgreSQL health check task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = sqlx::query("SELECT 1").execute(&db.pool).await {
                            tracing::warn!(role = db.role, error = %e, "PostgreSQL health check failed");
                        }
                    }
                }
            }
        })
    }
}
