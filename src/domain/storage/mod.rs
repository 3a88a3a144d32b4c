//! Storage plane: queue drain workers and partition lifecycle.

mod lifecycle;
mod worker;

pub use lifecycle::PartitionMaintenance;
pub use worker::StorageWorkerPool;
