//! Dead-letter sink
//!
//! Items the worker cannot persist after retries land here with their raw
//! payload and a reason, retained for operator inspection. A batch that
//! reaches the sink still counts as "not lost" for the no-loss contract.

use sqlx::PgPool;

use crate::data::postgres::error::PostgresError;

#[derive(Debug)]
pub struct DeadLetter {
    pub project_id: Option<i64>,
    pub payload: Vec<u8>,
    pub reason: String,
}

pub async fn insert(pool: &PgPool, items: &[DeadLetter]) -> Result<(), PostgresError> {
    for item in items {
        sqlx::query(
            "INSERT INTO dead_letter_logs (project_id, payload, reason) VALUES ($1, $2, $3)",
        )
        .bind(item.project_id)
        .bind(&item.payload)
        .bind(&item.reason)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn count(pool: &PgPool) -> Result<i64, PostgresError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter_logs")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
