//! In-memory cache backend using moka + dashmap
//!
//! moka (TinyLFU) holds regular entries with per-entry TTLs; dashmap holds
//! the atomic counters backing rate limits and daily usage.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::Expiry;
use moka::future::Cache;

use super::backend::CacheBackend;
use super::error::CacheError;
use crate::core::config::CacheConfig;

/// How many counter operations between expired-counter sweeps
const COUNTER_CLEANUP_EVERY: u64 = 256;

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
    created_at: Instant,
}

/// Per-entry expiry so each key can carry its own TTL
struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_read(
        &self,
        _key: &String,
        _value: &CacheEntry,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        duration_until_expiry
    }
}

struct CounterEntry {
    count: AtomicI64,
    expires_at: Instant,
}

pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
    counters: DashMap<String, CounterEntry>,
    cleanup_ops: AtomicU64,
}

impl InMemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .initial_capacity((config.max_entries as usize / 4).min(10_000))
            .expire_after(VariableTtlExpiry)
            .build();

        Self {
            cache,
            counters: DashMap::new(),
            cleanup_ops: AtomicU64::new(0),
        }
    }

    fn cleanup_expired_counters(&self) {
        let now = Instant::now();
        self.counters.retain(|_, entry| now < entry.expires_at);
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.data.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            data: value,
            ttl,
            created_at: Instant::now(),
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key))
    }

    async fn incr_by(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(Duration::from_secs(60));

        // Entry API gives exclusive access, avoiding a check-then-act race
        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if now >= counter.expires_at {
                    counter.count.store(amount, Ordering::SeqCst);
                    counter.expires_at = expires_at;
                    amount
                } else {
                    counter.count.fetch_add(amount, Ordering::SeqCst) + amount
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    count: AtomicI64::new(amount),
                    expires_at,
                });
                amount
            }
        };

        let ops = self.cleanup_ops.fetch_add(1, Ordering::Relaxed);
        if ops % COUNTER_CLEANUP_EVERY == 0 {
            self.cleanup_expired_counters();
        }

        Ok(count)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.counters.get(key) {
            if now < entry.expires_at {
                return Ok(Some(entry.count.load(Ordering::SeqCst)));
            }
        }
        Ok(None)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        // Counters first (rate limiting asks for reset hints)
        if let Some(entry) = self.counters.get(key) {
            let remaining = entry.expires_at.saturating_duration_since(Instant::now());
            if remaining > Duration::ZERO {
                return Ok(Some(remaining));
            }
            return Ok(None);
        }

        if let Some(entry) = self.cache.get(key).await {
            if let Some(ttl) = entry.ttl {
                if let Some(remaining) = ttl.checked_sub(entry.created_at.elapsed()) {
                    if remaining > Duration::ZERO {
                        return Ok(Some(remaining));
                    }
                }
                return Ok(None);
            }
            return Ok(None);
        }

        Ok(None)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let prefix = pattern.trim_end_matches('*');
        let mut count = 0u64;

        let keys_to_delete: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| (*k).clone())
            .collect();

        for key in keys_to_delete {
            self.cache.invalidate(&key).await;
            count += 1;
        }

        self.counters.retain(|k, _| {
            if k.starts_with(prefix) {
                count += 1;
                false
            } else {
                true
            }
        });

        Ok(count)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache() -> InMemoryCache {
        InMemoryCache::new(&CacheConfig {
            backend: crate::core::config::CacheBackendType::Memory,
            max_entries: 1000,
            redis_url: None,
        })
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = test_cache();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = test_cache();
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_by_creates_and_accumulates() {
        let cache = test_cache();
        assert_eq!(
            cache.incr_by("c", 1, Some(Duration::from_secs(60))).await.unwrap(),
            1
        );
        assert_eq!(
            cache.incr_by("c", 5, Some(Duration::from_secs(60))).await.unwrap(),
            6
        );
        assert_eq!(cache.get_counter("c").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_counter_resets_after_expiry() {
        let cache = test_cache();
        cache
            .incr_by("c", 3, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get_counter("c").await.unwrap(), None);
        assert_eq!(
            cache
                .incr_by("c", 1, Some(Duration::from_secs(60)))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = test_cache();
        cache.set("a:1", b"x".to_vec(), None).await.unwrap();
        cache.set("a:2", b"y".to_vec(), None).await.unwrap();
        cache.set("b:1", b"z".to_vec(), None).await.unwrap();

        // moka's iterator is eventually consistent; sync before scanning
        cache.cache.run_pending_tasks().await;

        let deleted = cache.delete_pattern("a:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.exists("b:1").await.unwrap());
    }
}
