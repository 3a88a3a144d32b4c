//! Topic error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopicError {
    #[error("Topic configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Subscriber fell behind and missed `0` messages (drop-oldest semantics)
    #[error("Subscriber lagged, {0} messages dropped")]
    Lagged(u64),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<deadpool_redis::redis::RedisError> for TopicError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for TopicError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(format!("pool: {e}"))
    }
}
