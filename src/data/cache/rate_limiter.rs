//! Rate limiting and quota accounting on top of the cache backend
//!
//! Two fixed windows per credential (per-minute and per-hour), each an atomic
//! counter with a TTL equal to the window length. Fixed windows can admit up
//! to one extra window's worth of requests at a boundary, which is within the
//! documented slack; the ceiling is never exceeded by more than that.
//!
//! Cache failures fail open: a broken counter store must not take the data
//! plane down with it.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;

use super::CacheService;
use super::key::CacheKey;
use crate::core::constants::{
    DAILY_USAGE_TTL_SECS, RATE_LIMIT_HOUR_WINDOW_SECS, RATE_LIMIT_MINUTE_WINDOW_SECS,
};
use crate::utils::time::day_key;

/// Effective limits for one credential (from its `CredentialRecord`)
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub minute_count: i64,
    pub minute_limit: u32,
    pub hour_count: i64,
    pub hour_limit: u32,
    /// Unix timestamp when the minute window resets
    pub reset_at: u64,
    /// Seconds until retry (only when blocked)
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn minute_remaining(&self) -> u32 {
        i64::from(self.minute_limit)
            .saturating_sub(self.minute_count)
            .try_into()
            .unwrap_or(0)
    }

    pub fn hour_remaining(&self) -> u32 {
        i64::from(self.hour_limit)
            .saturating_sub(self.hour_count)
            .try_into()
            .unwrap_or(0)
    }

    /// True when the hourly bucket (not the minute bucket) is what tripped
    pub fn hour_exceeded(&self) -> bool {
        self.hour_count > i64::from(self.hour_limit)
    }
}

pub struct RateLimiter {
    cache: Arc<CacheService>,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Increment both windows for the credential and compare against its
    /// limits. Increment-and-get is atomic per window.
    pub async fn check(&self, credential_hash: &str, limits: &RateLimits) -> RateLimitDecision {
        let minute_key = CacheKey::rate_limit_minute(credential_hash);
        let hour_key = CacheKey::rate_limit_hour(credential_hash);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "System clock is before UNIX epoch");
                0
            });

        let minute_count = self
            .incr_failing_open(&minute_key, RATE_LIMIT_MINUTE_WINDOW_SECS)
            .await;
        let hour_count = self
            .incr_failing_open(&hour_key, RATE_LIMIT_HOUR_WINDOW_SECS)
            .await;

        let minute_ok = minute_count <= i64::from(limits.per_minute);
        let hour_ok = hour_count <= i64::from(limits.per_hour);
        let allowed = minute_ok && hour_ok;

        let minute_ttl = self.cache.ttl(&minute_key).await.ok().flatten();
        let reset_at = now.saturating_add(
            minute_ttl
                .map(|d| d.as_secs())
                .unwrap_or(RATE_LIMIT_MINUTE_WINDOW_SECS),
        );

        let retry_after = if allowed {
            None
        } else if !hour_ok {
            let hour_ttl = self.cache.ttl(&hour_key).await.ok().flatten();
            Some(
                hour_ttl
                    .map(|d| d.as_secs())
                    .unwrap_or(RATE_LIMIT_HOUR_WINDOW_SECS),
            )
        } else {
            Some(
                minute_ttl
                    .map(|d| d.as_secs())
                    .unwrap_or(RATE_LIMIT_MINUTE_WINDOW_SECS),
            )
        };

        tracing::trace!(
            minute_count,
            hour_count,
            minute_limit = limits.per_minute,
            hour_limit = limits.per_hour,
            allowed,
            "Rate limit check"
        );

        RateLimitDecision {
            allowed,
            minute_count,
            minute_limit: limits.per_minute,
            hour_count,
            hour_limit: limits.per_hour,
            reset_at,
            retry_after,
        }
    }

    async fn incr_failing_open(&self, key: &str, window_secs: u64) -> i64 {
        match self
            .cache
            .incr_by(key, 1, Some(Duration::from_secs(window_secs)))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    key = %key,
                    error = %e,
                    "Rate limit counter increment failed, allowing request"
                );
                1
            }
        }
    }
}

/// Per-project daily usage counter backing the quota check and usage stats
pub struct DailyUsage {
    cache: Arc<CacheService>,
}

impl DailyUsage {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Events accepted today for the project (0 when no counter exists)
    pub async fn current(&self, project_id: i64) -> i64 {
        let key = CacheKey::daily_usage(project_id, &day_key(Utc::now()));
        match self.cache.get_counter(&key).await {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                tracing::warn!(project_id, error = %e, "Daily usage read failed, assuming 0");
                0
            }
        }
    }

    /// Record `accepted` more events against today's counter
    pub async fn record(&self, project_id: i64, accepted: i64) {
        if accepted <= 0 {
            return;
        }
        let key = CacheKey::daily_usage(project_id, &day_key(Utc::now()));
        if let Err(e) = self
            .cache
            .incr_by(
                &key,
                accepted,
                Some(Duration::from_secs(DAILY_USAGE_TTL_SECS)),
            )
            .await
        {
            tracing::warn!(project_id, error = %e, "Daily usage increment failed");
        }
    }
}
