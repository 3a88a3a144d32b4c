//! Data layer: cache, per-project queues, notification bus, PostgreSQL.

pub mod cache;
pub mod postgres;
pub mod queue;
pub mod topics;

pub use cache::{CacheService, DailyUsage, RateLimiter};
pub use postgres::{PartitionManager, PostgresService};
pub use queue::QueueService;
pub use topics::TopicService;
