//! PostgreSQL error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostgresError {
    #[error("PostgreSQL error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PostgresError {
    /// Connection-level failures that a retry with backoff may resolve.
    /// Constraint violations and syntax errors are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Row-level integrity failures (unique/check/not-null violations) that
    /// split-and-retry cannot fix for the offending row
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                // Class 23 = integrity constraint violation
                db.code().map(|c| c.starts_with("23")).unwrap_or(false)
            }
            _ => false,
        }
    }
}
