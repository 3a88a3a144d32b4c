//! Core application
//!
//! Composition root: every pool, cache, breaker and service is constructed
//! here at startup and passed down explicitly. No ambient globals.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::core::breaker::{BreakerRegistry, DEP_AUTH};
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::{CacheService, DailyUsage, RateLimiter};
use crate::data::postgres::{PartitionManager, PostgresService};
use crate::data::queue::QueueService;
use crate::data::topics::TopicService;
use crate::domain::analytics::Aggregator;
use crate::domain::auth::{CredentialResolver, PostgresCredentialAuthority};
use crate::domain::ingest::IngestService;
use crate::domain::query::QueryService;
use crate::domain::storage::{PartitionMaintenance, StorageWorkerPool};

pub struct CoreApp {
    pub config: AppConfig,
    pub shutdown: ShutdownService,
    pub cache: Arc<CacheService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub usage: Arc<DailyUsage>,
    pub queue: Arc<QueueService>,
    pub topics: Arc<TopicService>,
    pub identity_db: Arc<PostgresService>,
    pub logs_db: Arc<PostgresService>,
    pub partitions: Arc<PartitionManager>,
    pub breakers: Arc<BreakerRegistry>,
    pub resolver: Arc<CredentialResolver>,
    pub ingest: Arc<IngestService>,
    pub query: Arc<QueryService>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let shutdown = ShutdownService::new();

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {e}"))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&cache)));
        let usage = Arc::new(DailyUsage::new(Arc::clone(&cache)));

        let queue = Arc::new(
            QueueService::from_cache_config(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize queue service: {e}"))?,
        );
        tracing::debug!(backend = queue.backend_name(), "Queue initialized");

        let topics = Arc::new(
            TopicService::from_cache_config(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize topic service: {e}"))?,
        );
        tracing::debug!(backend = topics.backend_name(), "Topics initialized");

        let (identity_db, logs_db) = tokio::try_join!(
            async {
                PostgresService::connect(&config.identity_db, "identity")
                    .await
                    .context("identity database")
            },
            async {
                PostgresService::connect(&config.logs_db, "logs")
                    .await
                    .context("logs database")
            },
        )?;
        let identity_db = Arc::new(identity_db);
        let logs_db = Arc::new(logs_db);

        logs_db
            .run_logs_migrations()
            .await
            .context("logs database migrations")?;

        let partitions = Arc::new(PartitionManager::new(logs_db.pool().clone()));

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let authority = Arc::new(PostgresCredentialAuthority::new(Arc::clone(&identity_db)));
        let resolver = Arc::new(CredentialResolver::new(
            Arc::clone(&cache),
            authority,
            breakers.get(DEP_AUTH),
            config.auth.clone(),
        ));

        let ingest = Arc::new(IngestService::new(
            Arc::clone(&queue),
            Arc::clone(&topics),
            Arc::clone(&usage),
            config.ingest.clone(),
        ));

        let query = Arc::new(QueryService::new(
            Arc::clone(&logs_db),
            Arc::clone(&cache),
        ));

        Ok(Self {
            config,
            shutdown,
            cache,
            rate_limiter,
            usage,
            queue,
            topics,
            identity_db,
            logs_db,
            partitions,
            breakers,
            resolver,
            ingest,
            query,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            workers = app.config.storage.worker_count,
            "Faultline starting"
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;

        // Drain background work before closing anything it writes to
        app.shutdown.drain().await;
        app.topics.shutdown().await;
        tokio::join!(app.logs_db.close(), app.identity_db.close());

        tracing::debug!("Shutdown complete");
        Ok(())
    }

    async fn start_background_tasks(&self) {
        self.shutdown
            .register(
                self.identity_db
                    .start_health_check_task(self.shutdown.subscribe()),
            )
            .await;
        self.shutdown
            .register(self.logs_db.start_health_check_task(self.shutdown.subscribe()))
            .await;

        // Storage workers drain the queues into partitioned storage
        let workers = StorageWorkerPool::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.logs_db),
            Arc::clone(&self.partitions),
            self.config.storage.clone(),
        );
        workers.start(&self.shutdown).await;

        // Partition lifecycle: pre-create ahead of wall clock, drop expired
        let maintenance = PartitionMaintenance::new(
            Arc::clone(&self.partitions),
            Arc::clone(&self.identity_db),
            self.config.retention.clone(),
        );
        self.shutdown
            .register(maintenance.start(self.shutdown.subscribe()))
            .await;

        // Scheduled pre-aggregation
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&self.logs_db),
            Arc::clone(&self.identity_db),
            Arc::clone(&self.cache),
            self.config.analytics.clone(),
            self.config.rate_limit.default_daily_quota,
        ));
        aggregator.start(&self.shutdown).await;

        tracing::debug!("Background tasks started");
    }
}
