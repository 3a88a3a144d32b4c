//! Application configuration
//!
//! All settings come from the environment (with documented defaults), with a
//! handful of CLI overrides. `.env` files are honored at startup.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};

use super::cli::CliConfig;
use super::constants::*;

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache/queue/bus substrate backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

impl FromStr for CacheBackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => bail!("unknown cache backend: {other} (expected 'memory' or 'redis')"),
        }
    }
}

// =============================================================================
// Config sections
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub credential_ttl_secs: u64,
    pub emergency_ttl_secs: u64,
    pub negative_ttl_secs: u64,
    pub tombstone_ttl_secs: u64,
    pub authority_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_per_minute: u32,
    pub default_per_hour: u32,
    pub default_daily_quota: i64,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub queue_max_depth: u64,
    pub max_batch_events: usize,
    pub backpressure_retry_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub worker_count: usize,
    pub batch_max: usize,
    pub flush_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window_size: usize,
    pub failure_rate_percent: u8,
    pub cooloff_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub error_rate_secs: u64,
    pub log_volume_secs: u64,
    pub top_errors_secs: u64,
    pub usage_stats_secs: u64,
    pub rollup_secs: u64,
    pub lag_secs: i64,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    pub months_ahead: u32,
    pub fallback_days: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub identity_db: PostgresConfig,
    pub logs_db: PostgresConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub breaker: BreakerConfig,
    pub analytics: AnalyticsConfig,
    pub retention: RetentionConfig,
}

impl AppConfig {
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let db_max = env_or(ENV_DB_MAX_CONNECTIONS, POSTGRES_DEFAULT_MAX_CONNECTIONS);
        let db_min = env_or(ENV_DB_MIN_CONNECTIONS, POSTGRES_DEFAULT_MIN_CONNECTIONS);

        let cache_backend: CacheBackendType = match std::env::var(ENV_CACHE_BACKEND) {
            Ok(v) => v.parse()?,
            Err(_) => CacheBackendType::default(),
        };
        let redis_url = std::env::var(ENV_REDIS_URL).ok();

        if cache_backend == CacheBackendType::Redis && redis_url.is_none() {
            bail!("{ENV_REDIS_URL} is required when the cache backend is 'redis'");
        }

        let config = Self {
            server: ServerConfig {
                host: cli
                    .host
                    .clone()
                    .or_else(|| std::env::var(ENV_HOST).ok())
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: cli.port.unwrap_or_else(|| env_or(ENV_PORT, DEFAULT_PORT)),
            },
            identity_db: postgres_section(
                ENV_IDENTITY_DATABASE_URL,
                DEFAULT_IDENTITY_DATABASE_URL,
                db_max,
                db_min,
            ),
            logs_db: postgres_section(
                ENV_LOGS_DATABASE_URL,
                DEFAULT_LOGS_DATABASE_URL,
                db_max,
                db_min,
            ),
            cache: CacheConfig {
                backend: cache_backend,
                max_entries: env_or(ENV_CACHE_MAX_ENTRIES, DEFAULT_CACHE_MAX_ENTRIES),
                redis_url,
            },
            auth: AuthConfig {
                credential_ttl_secs: env_or(
                    ENV_CREDENTIAL_CACHE_TTL_SECS,
                    DEFAULT_CREDENTIAL_CACHE_TTL_SECS,
                ),
                emergency_ttl_secs: env_or(
                    ENV_EMERGENCY_CACHE_TTL_SECS,
                    DEFAULT_EMERGENCY_CACHE_TTL_SECS,
                ),
                negative_ttl_secs: DEFAULT_NEGATIVE_CACHE_TTL_SECS,
                tombstone_ttl_secs: DEFAULT_INVALIDATE_TOMBSTONE_TTL_SECS,
                authority_timeout_ms: env_or(ENV_AUTHORITY_TIMEOUT_MS, DEFAULT_AUTHORITY_TIMEOUT_MS),
            },
            rate_limit: RateLimitConfig {
                default_per_minute: env_or(ENV_RATE_LIMIT_PER_MINUTE, DEFAULT_RATE_LIMIT_PER_MINUTE),
                default_per_hour: env_or(ENV_RATE_LIMIT_PER_HOUR, DEFAULT_RATE_LIMIT_PER_HOUR),
                default_daily_quota: env_or(ENV_DAILY_QUOTA, DEFAULT_DAILY_QUOTA),
            },
            ingest: IngestConfig {
                queue_max_depth: env_or(ENV_QUEUE_MAX_DEPTH, DEFAULT_QUEUE_MAX_DEPTH),
                max_batch_events: MAX_BATCH_EVENTS,
                backpressure_retry_secs: DEFAULT_BACKPRESSURE_RETRY_SECS,
            },
            storage: StorageConfig {
                worker_count: env_or(ENV_WORKER_COUNT, DEFAULT_WORKER_COUNT),
                batch_max: env_or(ENV_QUEUE_BATCH_SIZE, DEFAULT_QUEUE_BATCH_SIZE),
                flush_interval_ms: env_or(ENV_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_INTERVAL_MS),
                poll_interval_ms: WORKER_POLL_INTERVAL_MS,
                retry_max_attempts: WORKER_RETRY_MAX_ATTEMPTS,
                retry_base_delay_ms: WORKER_RETRY_BASE_DELAY_MS,
            },
            breaker: BreakerConfig {
                failure_threshold: env_or(
                    ENV_BREAKER_FAILURE_THRESHOLD,
                    DEFAULT_BREAKER_FAILURE_THRESHOLD,
                ),
                window_size: DEFAULT_BREAKER_WINDOW_SIZE,
                failure_rate_percent: DEFAULT_BREAKER_FAILURE_RATE_PERCENT,
                cooloff_secs: env_or(ENV_BREAKER_COOLOFF_SECS, DEFAULT_BREAKER_COOLOFF_SECS),
            },
            analytics: AnalyticsConfig {
                error_rate_secs: ERROR_RATE_INTERVAL_SECS,
                log_volume_secs: LOG_VOLUME_INTERVAL_SECS,
                top_errors_secs: TOP_ERRORS_INTERVAL_SECS,
                usage_stats_secs: USAGE_STATS_INTERVAL_SECS,
                rollup_secs: HOURLY_ROLLUP_INTERVAL_SECS,
                lag_secs: AGGREGATION_LAG_SECS,
            },
            retention: RetentionConfig {
                sweep_interval_secs: env_or(ENV_RETENTION_SWEEP_SECS, DEFAULT_RETENTION_SWEEP_SECS),
                months_ahead: PARTITION_MONTHS_AHEAD,
                fallback_days: env_or(ENV_RETENTION_FALLBACK_DAYS, DEFAULT_RETENTION_FALLBACK_DAYS),
            },
        };

        Ok(config)
    }
}

fn postgres_section(url_env: &str, url_default: &str, max: u32, min: u32) -> PostgresConfig {
    PostgresConfig {
        url: std::env::var(url_env).unwrap_or_else(|_| url_default.to_string()),
        max_connections: max,
        min_connections: min,
        acquire_timeout_secs: POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
        idle_timeout_secs: POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
        max_lifetime_secs: POSTGRES_DEFAULT_MAX_LIFETIME_SECS,
        statement_timeout_secs: POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
