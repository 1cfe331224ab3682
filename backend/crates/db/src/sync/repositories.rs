use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::models::{RecordMapping, RunCounts, RunStatus, SyncMetadata, SyncRun};
use rowsync_common::SyncResult;

/// Durable sync state: record mappings, run history and watermarks.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get_mapping(&self, sync_name: &str, source_key: &str)
        -> SyncResult<Option<RecordMapping>>;

    /// Insert or replace the mapping for (sync_name, source_key).
    /// On conflict, updates destination id and hash but preserves created_at.
    async fn put_mapping(
        &self,
        sync_name: &str,
        source_key: &str,
        destination_id: &str,
        content_hash: &str,
    ) -> SyncResult<RecordMapping>;

    async fn count_mappings(&self, sync_name: &str) -> SyncResult<u64>;

    async fn get_last_sync_time(&self, sync_name: &str) -> SyncResult<Option<DateTime<Utc>>>;

    /// Store the watermark. A value older than the stored one is ignored.
    async fn set_last_sync_time(&self, sync_name: &str, at: DateTime<Utc>) -> SyncResult<()>;

    async fn get_metadata(&self, sync_name: &str) -> SyncResult<Option<SyncMetadata>>;

    /// Open a run in `running` state.
    async fn begin_run(&self, sync_name: &str) -> SyncResult<Uuid>;

    /// Record the terminal state of a run. Fails if the run is unknown or
    /// already finished, or if `status` is `running`.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error_summary: Option<&str>,
    ) -> SyncResult<SyncRun>;

    /// Finish a run as `success` and, if given, advance the watermark, in one
    /// transaction. Fails like `finish_run` if the run is no longer running;
    /// the watermark is then left untouched.
    async fn complete_run(
        &self,
        run_id: Uuid,
        sync_name: &str,
        counts: RunCounts,
        watermark: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncRun>;

    async fn get_run(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>>;

    /// Newest first.
    async fn recent_runs(&self, sync_name: &str, limit: u32) -> SyncResult<Vec<SyncRun>>;

    /// Runs started in `[from, to)`, oldest first.
    async fn runs_between(
        &self,
        sync_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncRun>>;

    async fn running_runs(&self, sync_name: &str) -> SyncResult<Vec<SyncRun>>;

    /// Mark every `running` run as failed with `reason`. Returns how many changed.
    async fn fail_orphaned_runs(&self, reason: &str) -> SyncResult<u64>;

    /// Delete mappings and watermark for one sync; run history is kept.
    /// Returns the number of mappings removed.
    async fn reset_sync(&self, sync_name: &str) -> SyncResult<u64>;
}
