//! Queue error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(String),
}

impl From<deadpool_redis::redis::RedisError> for QueueError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Redis(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Redis(format!("pool: {e}"))
    }
}
