//! Credential resolution: the identity & quota cache
//!
//! Resolves a presented API credential to its project, quotas and rate
//! limits. The fast path is the primary cache entry (short TTL) keyed by the
//! credential digest; misses go to the `CredentialAuthority` behind the auth
//! circuit breaker.
//!
//! Cache/breaker rule: every successful authoritative lookup also writes an
//! emergency mirror with a longer TTL, and that mirror is served ONLY while
//! the breaker is open. Authoritative not-found/revoked answers write a
//! negative entry and delete the mirror, so a dead credential cannot be
//! resurrected by an outage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::breaker::{Admission, CircuitBreaker};
use crate::core::config::AuthConfig;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::postgres::PostgresService;
use crate::data::postgres::error::PostgresError;
use crate::data::postgres::repositories::credentials;
use crate::utils::crypto::credential_digest;

/// What a credential resolves to. Cached under the credential digest; the
/// plaintext credential is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub project_id: i64,
    pub account_id: Option<i64>,
    pub daily_quota: i64,
    pub retention_days: i32,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,
    pub issued_at: DateTime<Utc>,
}

/// A resolved credential plus the digest used for rate-limit keys
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub record: CredentialRecord,
    pub credential_hash: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingCredential,

    #[error("Invalid Authorization header format")]
    MalformedHeader,

    /// Authoritative rejection (unknown or revoked); never retried, never
    /// served from the emergency cache
    #[error("Invalid or expired API key")]
    InvalidKey,

    /// The authority is unreachable and no emergency entry could absorb the
    /// miss
    #[error("Authentication service unavailable")]
    AuthorityUnavailable { retry_after_secs: u64 },
}

/// The auth collaborator seam. In-process deployments read the identity
/// database directly; a remote auth service plugs in behind the same trait.
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    /// Authoritative lookup by credential digest. `Ok(None)` means unknown
    /// or revoked (a permanent rejection); `Err` means the authority itself
    /// failed and feeds the circuit breaker.
    async fn lookup(&self, credential_hash: &str)
    -> Result<Option<CredentialRecord>, PostgresError>;
}

/// Identity-database implementation of the authority
pub struct PostgresCredentialAuthority {
    identity: Arc<PostgresService>,
}

impl PostgresCredentialAuthority {
    pub fn new(identity: Arc<PostgresService>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl CredentialAuthority for PostgresCredentialAuthority {
    async fn lookup(
        &self,
        credential_hash: &str,
    ) -> Result<Option<CredentialRecord>, PostgresError> {
        let row = credentials::lookup_api_key(self.identity.pool(), credential_hash).await?;

        Ok(row.filter(|r| r.is_active()).map(|r| CredentialRecord {
            project_id: r.project_id,
            account_id: r.account_id,
            daily_quota: r.daily_quota,
            retention_days: r.retention_days,
            rate_limit_per_minute: r.rate_limit_per_minute.max(0) as u32,
            rate_limit_per_hour: r.rate_limit_per_hour.max(0) as u32,
            issued_at: r.created_at,
        }))
    }
}

pub struct CredentialResolver {
    cache: Arc<CacheService>,
    authority: Arc<dyn CredentialAuthority>,
    breaker: Arc<CircuitBreaker>,
    config: AuthConfig,
}

impl CredentialResolver {
    pub fn new(
        cache: Arc<CacheService>,
        authority: Arc<dyn CredentialAuthority>,
        breaker: Arc<CircuitBreaker>,
        config: AuthConfig,
    ) -> Self {
        Self {
            cache,
            authority,
            breaker,
            config,
        }
    }

    pub async fn resolve(&self, credential: &str) -> Result<ResolvedCredential, AuthError> {
        let credential_hash = credential_digest(credential);
        let record = self.resolve_hash(&credential_hash).await?;
        Ok(ResolvedCredential {
            record,
            credential_hash,
        })
    }

    /// Resolution by digest. Negative entries are consulted before the
    /// primary so an invalidation tombstone beats a racing refresh.
    pub async fn resolve_hash(&self, hash: &str) -> Result<CredentialRecord, AuthError> {
        if self
            .cache
            .exists(&CacheKey::credential_negative(hash))
            .await
            .unwrap_or(false)
        {
            return Err(AuthError::InvalidKey);
        }

        match self.cache.get::<CredentialRecord>(&CacheKey::credential(hash)).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Credential cache read failed, falling through"),
        }

        match self.breaker.try_acquire() {
            Admission::Rejected { retry_after } => {
                if let Some(record) = self.emergency_while_open(hash).await {
                    return Ok(record);
                }
                Err(AuthError::AuthorityUnavailable {
                    retry_after_secs: retry_after.as_secs().max(1),
                })
            }
            Admission::Allowed { .. } => self.lookup_via_authority(hash).await,
        }
    }

    async fn lookup_via_authority(&self, hash: &str) -> Result<CredentialRecord, AuthError> {
        let timeout = Duration::from_millis(self.config.authority_timeout_ms);

        match tokio::time::timeout(timeout, self.authority.lookup(hash)).await {
            Ok(Ok(Some(record))) => {
                self.breaker.record_success();

                let primary_ttl = Duration::from_secs(self.config.credential_ttl_secs);
                let emergency_ttl = Duration::from_secs(self.config.emergency_ttl_secs);
                if let Err(e) = self
                    .cache
                    .set(&CacheKey::credential(hash), &record, Some(primary_ttl))
                    .await
                {
                    tracing::warn!(error = %e, "Failed to write primary credential cache");
                }
                if let Err(e) = self
                    .cache
                    .set(
                        &CacheKey::credential_emergency(hash),
                        &record,
                        Some(emergency_ttl),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to write emergency credential cache");
                }

                Ok(record)
            }
            Ok(Ok(None)) => {
                // The dependency answered; the credential is just bad
                self.breaker.record_success();

                let negative_ttl = Duration::from_secs(self.config.negative_ttl_secs);
                let _ = self
                    .cache
                    .set_raw(&CacheKey::credential_negative(hash), vec![1], Some(negative_ttl))
                    .await;
                // A revoked credential must not survive in the mirror
                self.cache
                    .invalidate_key(&CacheKey::credential_emergency(hash))
                    .await;

                Err(AuthError::InvalidKey)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Credential authority lookup failed");
                self.breaker.record_failure();
                self.unavailable_fallback(hash).await
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.config.authority_timeout_ms,
                    "Credential authority lookup timed out"
                );
                self.breaker.record_failure();
                self.unavailable_fallback(hash).await
            }
        }
    }

    /// After a transient authority failure: the emergency mirror may absorb
    /// the miss, but only once the breaker has actually opened
    async fn unavailable_fallback(&self, hash: &str) -> Result<CredentialRecord, AuthError> {
        if let Some(record) = self.emergency_while_open(hash).await {
            return Ok(record);
        }
        Err(AuthError::AuthorityUnavailable {
            retry_after_secs: self.breaker.cooloff().as_secs(),
        })
    }

    async fn emergency_while_open(&self, hash: &str) -> Option<CredentialRecord> {
        if !self.breaker.is_open() {
            return None;
        }
        match self
            .cache
            .get::<CredentialRecord>(&CacheKey::credential_emergency(hash))
            .await
        {
            Ok(Some(record)) => {
                tracing::warn!(
                    project_id = record.project_id,
                    "Serving emergency credential cache while auth circuit is open"
                );
                Some(record)
            }
            _ => None,
        }
    }

    /// Remove the primary entry for a credential. The tombstone is written
    /// first so a refresh racing this call cannot resurrect the entry; the
    /// emergency mirror is deliberately kept.
    pub async fn invalidate(&self, hash: &str) {
        let tombstone_ttl = Duration::from_secs(self.config.tombstone_ttl_secs);
        let _ = self
            .cache
            .set_raw(&CacheKey::credential_negative(hash), vec![1], Some(tombstone_ttl))
            .await;
        self.cache.invalidate_key(&CacheKey::credential(hash)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BreakerConfig, CacheBackendType, CacheConfig};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted authority: pops one response per call, falling back to the
    /// last response when the script runs dry
    struct ScriptedAuthority {
        script: Mutex<VecDeque<Script>>,
        fallback: Script,
        calls: AtomicUsize,
    }

    #[derive(Clone)]
    enum Script {
        Found,
        NotFound,
        Failure,
    }

    impl ScriptedAuthority {
        fn new(script: Vec<Script>, fallback: Script) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn record() -> CredentialRecord {
        CredentialRecord {
            project_id: 7,
            account_id: Some(3),
            daily_quota: 1_000_000,
            retention_days: 90,
            rate_limit_per_minute: 1000,
            rate_limit_per_hour: 20_000,
            issued_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[async_trait]
    impl CredentialAuthority for ScriptedAuthority {
        async fn lookup(
            &self,
            _hash: &str,
        ) -> Result<Option<CredentialRecord>, PostgresError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            match step {
                Script::Found => Ok(Some(record())),
                Script::NotFound => Ok(None),
                Script::Failure => Err(PostgresError::Database(sqlx::Error::PoolTimedOut)),
            }
        }
    }

    fn auth_config() -> AuthConfig {
        AuthConfig {
            credential_ttl_secs: 300,
            emergency_ttl_secs: 600,
            negative_ttl_secs: 30,
            tombstone_ttl_secs: 5,
            authority_timeout_ms: 1000,
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "auth",
            &BreakerConfig {
                failure_threshold: 3,
                window_size: 20,
                failure_rate_percent: 50,
                cooloff_secs: 30,
            },
        ))
    }

    async fn resolver(authority: Arc<ScriptedAuthority>) -> (CredentialResolver, Arc<CircuitBreaker>) {
        let cache = Arc::new(
            CacheService::new(&CacheConfig {
                backend: CacheBackendType::Memory,
                max_entries: 1000,
                redis_url: None,
            })
            .await
            .unwrap(),
        );
        let b = breaker();
        (
            CredentialResolver::new(cache, authority, Arc::clone(&b), auth_config()),
            b,
        )
    }

    #[tokio::test]
    async fn test_primary_cache_absorbs_repeat_lookups() {
        let authority = Arc::new(ScriptedAuthority::new(vec![], Script::Found));
        let (resolver, _) = resolver(Arc::clone(&authority)).await;

        let first = resolver.resolve("fl_key").await.unwrap();
        let second = resolver.resolve("fl_key").await.unwrap();
        assert_eq!(first.record, second.record);
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_negative_cached() {
        let authority = Arc::new(ScriptedAuthority::new(vec![], Script::NotFound));
        let (resolver, _) = resolver(Arc::clone(&authority)).await;

        assert!(matches!(
            resolver.resolve("bad_key").await,
            Err(AuthError::InvalidKey)
        ));
        assert!(matches!(
            resolver.resolve("bad_key").await,
            Err(AuthError::InvalidKey)
        ));
        assert_eq!(authority.calls(), 1, "second rejection must come from cache");
    }

    #[tokio::test]
    async fn test_single_failure_does_not_serve_emergency() {
        // Populate emergency via one success, then fail once: breaker is
        // still closed, so the miss surfaces as unavailable.
        let authority = Arc::new(ScriptedAuthority::new(
            vec![Script::Found, Script::Failure],
            Script::Failure,
        ));
        let (resolver, breaker) = resolver(Arc::clone(&authority)).await;

        resolver.resolve("fl_key").await.unwrap();
        // Expire the primary entry the hard way: use a different credential
        // that shares nothing with the cached one
        let result = resolver.resolve("other_key").await;
        assert!(matches!(
            result,
            Err(AuthError::AuthorityUnavailable { .. })
        ));
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn test_emergency_served_only_while_open() {
        let authority = Arc::new(ScriptedAuthority::new(
            vec![Script::Found],
            Script::Failure,
        ));
        let (resolver, breaker) = resolver(Arc::clone(&authority)).await;

        // Success populates both caches for this credential
        resolver.resolve("fl_key").await.unwrap();
        let hash = credential_digest("fl_key");

        // Drop the primary entry so the next resolve must go to the authority
        resolver.cache.invalidate_key(&CacheKey::credential(&hash)).await;

        // Failures 1 and 2: breaker still closed, no emergency fallback
        for _ in 0..2 {
            assert!(matches!(
                resolver.resolve_hash(&hash).await,
                Err(AuthError::AuthorityUnavailable { .. })
            ));
        }
        assert!(!breaker.is_open());

        // Failure 3 trips the breaker; the same call is then absorbed by the
        // emergency mirror
        let record = resolver.resolve_hash(&hash).await.unwrap();
        assert!(breaker.is_open());
        assert_eq!(record.project_id, 7);

        // While open, resolution keeps working from the mirror without
        // touching the authority again
        let calls_before = authority.calls();
        let record = resolver.resolve_hash(&hash).await.unwrap();
        assert_eq!(record.project_id, 7);
        assert_eq!(authority.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_open_circuit_without_emergency_fails_fast() {
        let authority = Arc::new(ScriptedAuthority::new(vec![], Script::Failure));
        let (resolver, breaker) = resolver(Arc::clone(&authority)).await;

        for _ in 0..3 {
            let _ = resolver.resolve("fl_key").await;
        }
        assert!(breaker.is_open());

        let calls_before = authority.calls();
        match resolver.resolve("fl_key").await {
            Err(AuthError::AuthorityUnavailable { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected fast failure, got {:?}", other.map(|r| r.record)),
        }
        assert_eq!(authority.calls(), calls_before, "open circuit must not call the authority");
    }

    #[tokio::test]
    async fn test_invalidate_wins_over_cached_entry() {
        let authority = Arc::new(ScriptedAuthority::new(vec![], Script::Found));
        let (resolver, _) = resolver(Arc::clone(&authority)).await;

        let resolved = resolver.resolve("fl_key").await.unwrap();
        resolver.invalidate(&resolved.credential_hash).await;

        // The tombstone rejects even though a refresh could still be racing
        assert!(matches!(
            resolver.resolve_hash(&resolved.credential_hash).await,
            Err(AuthError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn test_revoked_credential_clears_emergency() {
        let authority = Arc::new(ScriptedAuthority::new(
            vec![Script::Found, Script::NotFound],
            Script::Failure,
        ));
        let (resolver, breaker) = resolver(Arc::clone(&authority)).await;

        let resolved = resolver.resolve("fl_key").await.unwrap();
        let hash = resolved.credential_hash;

        // Authoritative revocation: clears the mirror, writes negative
        resolver.cache.invalidate_key(&CacheKey::credential(&hash)).await;
        assert!(matches!(
            resolver.resolve_hash(&hash).await,
            Err(AuthError::InvalidKey)
        ));

        // Now trip the breaker with a different credential and confirm the
        // revoked one is NOT resurrected from the mirror.
        for _ in 0..3 {
            let _ = resolver.resolve("other_key").await;
        }
        assert!(breaker.is_open());
        assert!(matches!(
            resolver.resolve_hash(&hash).await,
            Err(AuthError::InvalidKey)
        ));
    }
}
