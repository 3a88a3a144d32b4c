//! Partition lifecycle maintenance
//!
//! Hourly sweep: make sure partitions exist for the current and next month
//! (worker-driven creation is authoritative; operator scripts stay
//! idempotent no-ops), and drop months that every tenant has aged out of.
//! Partitions are not per-tenant, so the drop cutoff follows the LARGEST
//! retention across projects.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::RetentionConfig;
use crate::data::postgres::partitions::{
    INGESTION_METRICS_TABLE, LOGS_TABLE, PartitionManager,
};
use crate::data::postgres::repositories::credentials;
use crate::data::postgres::PostgresService;

pub struct PartitionMaintenance {
    partitions: Arc<PartitionManager>,
    identity: Arc<PostgresService>,
    config: RetentionConfig,
}

impl PartitionMaintenance {
    pub fn new(
        partitions: Arc<PartitionManager>,
        identity: Arc<PostgresService>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            partitions,
            identity,
            config,
        }
    }

    /// Spawn the periodic sweep. The first tick fires immediately so a fresh
    /// deployment has partitions before the first flush.
    pub fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                self.config.sweep_interval_secs,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Partition maintenance shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }

    async fn sweep(&self) {
        for table in [LOGS_TABLE, INGESTION_METRICS_TABLE] {
            if let Err(e) = self
                .partitions
                .ensure_ahead(table, self.config.months_ahead)
                .await
            {
                tracing::error!(table, error = %e, "Partition pre-creation failed");
            }
        }

        let retention_days = match credentials::max_retention_days(
            self.identity.pool(),
            self.config.fallback_days,
        )
        .await
        {
            Ok(days) => days,
            Err(e) => {
                tracing::warn!(error = %e, "Retention lookup failed, skipping partition drop");
                return;
            }
        };

        let cutoff = (Utc::now() - ChronoDuration::days(retention_days)).date_naive();

        for table in [LOGS_TABLE, INGESTION_METRICS_TABLE] {
            match self.partitions.drop_older_than(table, cutoff).await {
                Ok(dropped) if !dropped.is_empty() => {
                    tracing::info!(table, count = dropped.len(), ?dropped, "Dropped expired partitions");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(table, error = %e, "Partition drop failed"),
            }
        }
    }
}
