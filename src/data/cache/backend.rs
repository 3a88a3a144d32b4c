//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Implemented by the in-memory and Redis backends. Single-key operations are
/// atomic; cross-key reads may observe intermediate states, which is
/// acceptable for cache semantics.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache with optional TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete a key. The returned flag is best-effort under concurrency.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check if a key exists (may be stale under concurrent expiry)
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomic increment-by with TTL applied when the counter is created.
    ///
    /// Rate limiting and quota accounting depend on the atomicity here.
    async fn incr_by(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError>;

    /// Read a counter without incrementing (None if absent or expired)
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Remaining TTL for a key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Delete keys matching a glob-style pattern, returning the count removed
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
