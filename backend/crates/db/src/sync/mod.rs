pub mod models;
pub mod repositories;
pub mod sqlite_repository;

pub use models::{RecordMapping, RunCounts, RunStatus, SyncMetadata, SyncRun};
pub use repositories::MappingStore;
pub use sqlite_repository::SqliteMappingStore;
