//! Scheduled pre-aggregation
//!
//! Interval-driven jobs reduce raw logs into metric series cached per
//! project, plus a persistent hourly rollup. Each run carries a deadline of
//! half its cadence; a run that exceeds it is abandoned and the next tick
//! retries (jobs are idempotent overwrites).

pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use jobs::{ErrorRatePoint, LogVolumePoint, TopError, UsagePoint};

use crate::core::config::AnalyticsConfig;
use crate::core::shutdown::ShutdownService;
use crate::data::cache::CacheService;
use crate::data::postgres::PostgresService;
use crate::data::postgres::error::PostgresError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    ErrorRates,
    LogVolumes,
    TopErrors,
    UsageStats,
    HourlyRollup,
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::ErrorRates => "error_rates",
            Job::LogVolumes => "log_volumes",
            Job::TopErrors => "top_errors",
            Job::UsageStats => "usage_stats",
            Job::HourlyRollup => "hourly_rollup",
        }
    }
}

pub struct Aggregator {
    logs_db: Arc<PostgresService>,
    identity_db: Arc<PostgresService>,
    cache: Arc<CacheService>,
    config: AnalyticsConfig,
    default_daily_quota: i64,
}

impl Aggregator {
    pub fn new(
        logs_db: Arc<PostgresService>,
        identity_db: Arc<PostgresService>,
        cache: Arc<CacheService>,
        config: AnalyticsConfig,
        default_daily_quota: i64,
    ) -> Self {
        Self {
            logs_db,
            identity_db,
            cache,
            config,
            default_daily_quota,
        }
    }

    pub async fn start(self: Arc<Self>, shutdown: &ShutdownService) {
        let schedule = [
            (Job::ErrorRates, self.config.error_rate_secs),
            (Job::LogVolumes, self.config.log_volume_secs),
            (Job::TopErrors, self.config.top_errors_secs),
            (Job::UsageStats, self.config.usage_stats_secs),
            (Job::HourlyRollup, self.config.rollup_secs),
        ];

        for (job, interval_secs) in schedule {
            shutdown
                .register(self.clone().spawn_job(job, interval_secs, shutdown.subscribe()))
                .await;
        }

        tracing::info!(jobs = schedule.len(), "Aggregation scheduler started");
    }

    fn spawn_job(
        self: Arc<Self>,
        job: Job,
        interval_secs: u64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let deadline = Duration::from_secs((interval_secs / 2).max(1));

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!(job = job.name(), "Aggregation job shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match tokio::time::timeout(deadline, self.run(job)).await {
                            Ok(Ok(touched)) => {
                                tracing::debug!(job = job.name(), touched, "Aggregation run complete");
                            }
                            Ok(Err(e)) => {
                                tracing::error!(job = job.name(), error = %e, "Aggregation run failed");
                            }
                            Err(_) => {
                                tracing::warn!(
                                    job = job.name(),
                                    deadline_secs = deadline.as_secs(),
                                    "Aggregation run exceeded deadline, retrying next tick"
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    async fn run(&self, job: Job) -> Result<u64, PostgresError> {
        let logs = self.logs_db.pool();
        match job {
            Job::ErrorRates => {
                jobs::aggregate_error_rates(logs, &self.cache, self.config.lag_secs)
                    .await
                    .map(|n| n as u64)
            }
            Job::LogVolumes => {
                jobs::aggregate_log_volumes(logs, &self.cache, self.config.lag_secs)
                    .await
                    .map(|n| n as u64)
            }
            Job::TopErrors => jobs::compute_top_errors(logs, &self.cache)
                .await
                .map(|n| n as u64),
            Job::UsageStats => jobs::generate_usage_stats(
                logs,
                self.identity_db.pool(),
                &self.cache,
                self.config.lag_secs,
                self.default_daily_quota,
            )
            .await
            .map(|n| n as u64),
            Job::HourlyRollup => jobs::rollup_hourly_metrics(logs).await,
        }
    }
}
