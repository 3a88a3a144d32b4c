//! Type-safe cache key builder
//!
//! Versioned keys (`v1:` prefix) can all be invalidated together on schema
//! changes. Rate-limit and usage counters are unversioned; counter semantics
//! never change shape.

use crate::core::constants::CACHE_KEY_VERSION;

pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // Credentials
    // =========================================================================

    /// Primary credential cache entry, keyed by the credential digest
    pub fn credential(hash: &str) -> String {
        format!("{}:cred:{}", CACHE_KEY_VERSION, hash)
    }

    /// Longer-lived emergency mirror, served only while the auth breaker is open
    pub fn credential_emergency(hash: &str) -> String {
        format!("{}:cred:emergency:{}", CACHE_KEY_VERSION, hash)
    }

    /// Negative entry: authoritative not-found/revoked, or invalidation tombstone
    pub fn credential_negative(hash: &str) -> String {
        format!("{}:cred:neg:{}", CACHE_KEY_VERSION, hash)
    }

    // =========================================================================
    // Rate limiting / quota
    // =========================================================================

    pub fn rate_limit_minute(credential_hash: &str) -> String {
        format!("rl:min:{}", credential_hash)
    }

    pub fn rate_limit_hour(credential_hash: &str) -> String {
        format!("rl:hour:{}", credential_hash)
    }

    /// Daily usage counter (`day` is a `YYYYMMDD` key)
    pub fn daily_usage(project_id: i64, day: &str) -> String {
        format!("usage:{}:{}", project_id, day)
    }

    // =========================================================================
    // Pre-aggregated metrics
    // =========================================================================

    pub fn metrics_error_rate(project_id: i64) -> String {
        format!("metrics:error_rate:{}:5min", project_id)
    }

    pub fn metrics_log_volume(project_id: i64) -> String {
        format!("metrics:log_volume:{}:1hour", project_id)
    }

    pub fn metrics_top_errors(project_id: i64) -> String {
        format!("metrics:top_errors:{}", project_id)
    }

    pub fn metrics_usage_stats(project_id: i64) -> String {
        format!("metrics:usage_stats:{}", project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_keys() {
        assert_eq!(CacheKey::credential("abc"), "v1:cred:abc");
        assert_eq!(
            CacheKey::credential_emergency("abc"),
            "v1:cred:emergency:abc"
        );
        assert_eq!(CacheKey::credential_negative("abc"), "v1:cred:neg:abc");
    }

    #[test]
    fn test_counter_keys_unversioned() {
        assert_eq!(CacheKey::rate_limit_minute("h"), "rl:min:h");
        assert_eq!(CacheKey::rate_limit_hour("h"), "rl:hour:h");
        assert_eq!(CacheKey::daily_usage(7, "20251114"), "usage:7:20251114");
    }

    #[test]
    fn test_metric_keys() {
        assert_eq!(CacheKey::metrics_error_rate(3), "metrics:error_rate:3:5min");
        assert_eq!(CacheKey::metrics_log_volume(3), "metrics:log_volume:3:1hour");
        assert_eq!(CacheKey::metrics_top_errors(3), "metrics:top_errors:3");
        assert_eq!(CacheKey::metrics_usage_stats(3), "metrics:usage_stats:3");
    }
}
