//! Redis queue backend
//!
//! One Redis list per project (`queue:logs:{project_id}`): `LPUSH` to
//! enqueue, `RPOP` with a count to drain, `LLEN` for depth. Queue contents
//! survive process restarts; at-least-once delivery is preserved by pushing
//! failed batches back.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};

use super::backend::QueueBackend;
use super::error::QueueError;

const QUEUE_KEY_PREFIX: &str = "queue:logs:";

pub struct RedisQueueBackend {
    pool: Pool,
}

impl RedisQueueBackend {
    pub async fn new(redis_url: &str) -> Result<Self, QueueError> {
        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 32,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Config(format!("Failed to create Redis pool: {e}")))?;

        let mut conn = pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;

        tracing::debug!("Redis queue backend connected");
        Ok(Self { pool })
    }

    fn queue_key(project_id: i64) -> String {
        format!("{}{}", QUEUE_KEY_PREFIX, project_id)
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn push(&self, project_id: i64, payloads: Vec<Vec<u8>>) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let key = Self::queue_key(project_id);
        let mut conn = self.pool.get().await?;
        // LPUSH pushes in argument order, so with RPOP on the other end the
        // list stays FIFO.
        conn.lpush::<_, _, ()>(&key, payloads).await?;
        Ok(())
    }

    async fn pop_batch(&self, project_id: i64, max: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        let Some(count) = NonZeroUsize::new(max) else {
            return Ok(Vec::new());
        };
        let key = Self::queue_key(project_id);
        let mut conn = self.pool.get().await?;
        let batch: Vec<Vec<u8>> = conn.rpop(&key, Some(count)).await?;
        Ok(batch)
    }

    async fn depth(&self, project_id: i64) -> Result<u64, QueueError> {
        let key = Self::queue_key(project_id);
        let mut conn = self.pool.get().await?;
        let depth: u64 = conn.llen(&key).await?;
        Ok(depth)
    }

    async fn active_projects(&self) -> Result<Vec<i64>, QueueError> {
        let mut conn = self.pool.get().await?;
        let mut cursor: u64 = 0;
        let mut projects = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = deadpool_redis::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{}*", QUEUE_KEY_PREFIX))
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                if let Some(id) = key
                    .strip_prefix(QUEUE_KEY_PREFIX)
                    .and_then(|s| s.parse().ok())
                {
                    projects.push(id);
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        projects.sort_unstable();
        projects.dedup();
        Ok(projects)
    }

    async fn wait_for_items(&self, timeout: Duration) {
        // No push-side wakeup across processes; fall back to a bounded sleep
        tokio::time::sleep(timeout).await;
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
