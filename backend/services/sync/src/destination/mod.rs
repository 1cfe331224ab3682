pub mod smartsuite;

use async_trait::async_trait;

use rowsync_common::SyncResult;
use rowsync_transform::Payload;

pub use smartsuite::SmartSuiteClient;

/// Remote table API the sync writes into. Failures are
/// `SyncError::Destination` carrying a `DestinationErrorKind`.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Create a record in `collection` and return its destination id.
    async fn create(&self, collection: &str, payload: &Payload) -> SyncResult<String>;

    async fn update(&self, collection: &str, destination_id: &str, payload: &Payload)
        -> SyncResult<()>;

    async fn ping(&self) -> SyncResult<()>;
}
