pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use rowsync_common::SyncResult;
use rowsync_transform::SourceRecord;

pub use mysql::MySqlSource;

/// Rows produced by one query execution, in source order.
pub type RecordStream<'a> = BoxStream<'a, SyncResult<SourceRecord>>;

/// Executes a sync's source query.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Start streaming rows for `query`. `since` is bound to every
    /// `:last_sync_time` occurrence; `None` binds NULL (full sync).
    fn fetch<'a>(&'a self, query: &'a str, since: Option<DateTime<Utc>>) -> RecordStream<'a>;

    /// Cheap connectivity check.
    async fn ping(&self) -> SyncResult<()>;
}
