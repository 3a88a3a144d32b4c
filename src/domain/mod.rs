//! Domain logic: event model, credential resolution, ingest, storage
//! workers, pre-aggregation, query.

pub mod analytics;
pub mod auth;
pub mod events;
pub mod ingest;
pub mod notify;
pub mod query;
pub mod storage;

pub use analytics::Aggregator;
pub use auth::{AuthError, CredentialRecord, CredentialResolver, ResolvedCredential};
pub use ingest::{IngestError, IngestReport, IngestService};
pub use notify::ErrorNotification;
pub use query::QueryService;
pub use storage::{PartitionMaintenance, StorageWorkerPool};
