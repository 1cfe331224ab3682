use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::sync::models::{RecordMapping, RunCounts, RunStatus, SyncMetadata, SyncRun};
use crate::sync::repositories::MappingStore;
use rowsync_common::{SyncError, SyncResult};

const RUN_COLUMNS: &str = "id, sync_name, started_at, finished_at, status, processed, created, \
                           updated, skipped, errored, error_summary";

#[derive(Clone)]
pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the state database and make sure the schema exists.
    pub async fn open(path: &str) -> SyncResult<Self> {
        let pool = crate::create_pool(path).await?;
        crate::bootstrap(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Error for a run that could not be closed because it is not `running`.
    async fn not_running(&self, run_id: Uuid) -> SyncError {
        match self.get_run(run_id).await {
            Ok(Some(existing)) => {
                SyncError::Storage(format!("run {run_id} is already {}", existing.status))
            }
            Ok(None) => SyncError::Storage(format!("run {run_id} does not exist")),
            Err(e) => e,
        }
    }

    fn map_mapping(row: SqliteRow) -> SyncResult<RecordMapping> {
        Ok(RecordMapping {
            sync_name: column(&row, "sync_name")?,
            source_key: column(&row, "source_key")?,
            destination_id: column(&row, "destination_id")?,
            content_hash: column(&row, "content_hash")?,
            created_at: decode_ts(&column::<String>(&row, "created_at")?)?,
            updated_at: decode_ts(&column::<String>(&row, "updated_at")?)?,
        })
    }

    fn map_run(row: SqliteRow) -> SyncResult<SyncRun> {
        let id: String = column(&row, "id")?;
        let status: String = column(&row, "status")?;
        let finished_at: Option<String> = column(&row, "finished_at")?;

        Ok(SyncRun {
            id: Uuid::parse_str(&id).map_err(|e| SyncError::Storage(format!("bad run id {id:?}: {e}")))?,
            sync_name: column(&row, "sync_name")?,
            started_at: decode_ts(&column::<String>(&row, "started_at")?)?,
            finished_at: finished_at.as_deref().map(decode_ts).transpose()?,
            status: status.parse().map_err(SyncError::Storage)?,
            counts: RunCounts {
                processed: count(&row, "processed")?,
                created: count(&row, "created")?,
                updated: count(&row, "updated")?,
                skipped: count(&row, "skipped")?,
                errored: count(&row, "errored")?,
            },
            error_summary: column(&row, "error_summary")?,
        })
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> SyncResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| SyncError::Storage(format!("column {name}: {e}")))
}

fn count(row: &SqliteRow, name: &str) -> SyncResult<u64> {
    let raw: i64 = column(row, name)?;
    u64::try_from(raw).map_err(|_| SyncError::Storage(format!("negative {name} count: {raw}")))
}

fn to_sql_count(value: u64) -> SyncResult<i64> {
    i64::try_from(value).map_err(|_| SyncError::Storage(format!("count {value} out of range")))
}

/// Fixed-width UTC text, so lexical order is chronological order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

/// Move a `running` run to `status`. `None` if no running run has that id.
async fn close_run(
    conn: &mut SqliteConnection,
    run_id: Uuid,
    status: RunStatus,
    counts: RunCounts,
    error_summary: Option<&str>,
) -> SyncResult<Option<SyncRun>> {
    if !status.is_terminal() {
        return Err(SyncError::Storage(format!(
            "run {run_id} cannot be finished as {status}"
        )));
    }

    let sql = format!(
        "update sync_runs
         set status = ?, finished_at = ?, processed = ?, created = ?, updated = ?,
             skipped = ?, errored = ?, error_summary = ?
         where id = ? and status = 'running'
         returning {RUN_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(encode_ts(Utc::now()))
        .bind(to_sql_count(counts.processed)?)
        .bind(to_sql_count(counts.created)?)
        .bind(to_sql_count(counts.updated)?)
        .bind(to_sql_count(counts.skipped)?)
        .bind(to_sql_count(counts.errored)?)
        .bind(error_summary)
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

    row.map(SqliteMappingStore::map_run).transpose()
}

/// Store the watermark unless the stored one is newer.
async fn upsert_watermark(
    conn: &mut SqliteConnection,
    sync_name: &str,
    at: DateTime<Utc>,
) -> SyncResult<()> {
    sqlx::query(
        "insert into sync_metadata (sync_name, last_sync_time, last_run_at)
         values (?, ?, ?)
         on conflict (sync_name) do update set
           last_sync_time = case
             when sync_metadata.last_sync_time is null
               or excluded.last_sync_time > sync_metadata.last_sync_time
             then excluded.last_sync_time
             else sync_metadata.last_sync_time
           end,
           last_run_at = excluded.last_run_at",
    )
    .bind(sync_name)
    .bind(encode_ts(at))
    .bind(encode_ts(Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(|e| SyncError::Storage(e.to_string()))?;

    Ok(())
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn get_mapping(
        &self,
        sync_name: &str,
        source_key: &str,
    ) -> SyncResult<Option<RecordMapping>> {
        let row = sqlx::query(
            "select sync_name, source_key, destination_id, content_hash, created_at, updated_at
             from record_mappings
             where sync_name = ? and source_key = ?",
        )
        .bind(sync_name)
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        row.map(Self::map_mapping).transpose()
    }

    async fn put_mapping(
        &self,
        sync_name: &str,
        source_key: &str,
        destination_id: &str,
        content_hash: &str,
    ) -> SyncResult<RecordMapping> {
        let now = encode_ts(Utc::now());
        let row = sqlx::query(
            "insert into record_mappings
               (sync_name, source_key, destination_id, content_hash, created_at, updated_at)
             values (?, ?, ?, ?, ?, ?)
             on conflict (sync_name, source_key) do update set
               destination_id = excluded.destination_id,
               content_hash = excluded.content_hash,
               updated_at = excluded.updated_at
             returning sync_name, source_key, destination_id, content_hash, created_at, updated_at",
        )
        .bind(sync_name)
        .bind(source_key)
        .bind(destination_id)
        .bind(content_hash)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        Self::map_mapping(row)
    }

    async fn count_mappings(&self, sync_name: &str) -> SyncResult<u64> {
        let n: i64 = sqlx::query_scalar("select count(*) from record_mappings where sync_name = ?")
            .bind(sync_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn get_last_sync_time(&self, sync_name: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_metadata(sync_name)
            .await?
            .and_then(|m| m.last_sync_time))
    }

    async fn set_last_sync_time(&self, sync_name: &str, at: DateTime<Utc>) -> SyncResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        upsert_watermark(&mut conn, sync_name, at).await
    }

    async fn get_metadata(&self, sync_name: &str) -> SyncResult<Option<SyncMetadata>> {
        let row = sqlx::query(
            "select sync_name, last_sync_time, last_run_at from sync_metadata where sync_name = ?",
        )
        .bind(sync_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_sync_time: Option<String> = column(&row, "last_sync_time")?;
        let last_run_at: Option<String> = column(&row, "last_run_at")?;
        Ok(Some(SyncMetadata {
            sync_name: column(&row, "sync_name")?,
            last_sync_time: last_sync_time.as_deref().map(decode_ts).transpose()?,
            last_run_at: last_run_at.as_deref().map(decode_ts).transpose()?,
        }))
    }

    async fn begin_run(&self, sync_name: &str) -> SyncResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("insert into sync_runs (id, sync_name, started_at, status) values (?, ?, ?, 'running')")
            .bind(id.to_string())
            .bind(sync_name)
            .bind(encode_ts(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(id)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: RunCounts,
        error_summary: Option<&str>,
    ) -> SyncResult<SyncRun> {
        let finished = {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            close_run(&mut conn, run_id, status, counts, error_summary).await?
        };

        match finished {
            Some(run) => Ok(run),
            None => Err(self.not_running(run_id).await),
        }
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        sync_name: &str,
        counts: RunCounts,
        watermark: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncRun> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let Some(run) = close_run(&mut tx, run_id, RunStatus::Success, counts, None).await? else {
            tx.rollback()
                .await
                .map_err(|e| SyncError::Storage(e.to_string()))?;
            return Err(self.not_running(run_id).await);
        };

        if let Some(at) = watermark {
            upsert_watermark(&mut tx, sync_name, at).await?;
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(run)
    }

    async fn get_run(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>> {
        let sql = format!("select {RUN_COLUMNS} from sync_runs where id = ?");
        let row = sqlx::query(&sql)
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        row.map(Self::map_run).transpose()
    }

    async fn recent_runs(&self, sync_name: &str, limit: u32) -> SyncResult<Vec<SyncRun>> {
        let sql = format!(
            "select {RUN_COLUMNS} from sync_runs
             where sync_name = ?
             order by started_at desc, rowid desc
             limit ?"
        );
        let rows = sqlx::query(&sql)
            .bind(sync_name)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        rows.into_iter().map(Self::map_run).collect()
    }

    async fn runs_between(
        &self,
        sync_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncRun>> {
        let sql = format!(
            "select {RUN_COLUMNS} from sync_runs
             where sync_name = ? and started_at >= ? and started_at < ?
             order by started_at asc, rowid asc"
        );
        let rows = sqlx::query(&sql)
            .bind(sync_name)
            .bind(encode_ts(from))
            .bind(encode_ts(to))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        rows.into_iter().map(Self::map_run).collect()
    }

    async fn running_runs(&self, sync_name: &str) -> SyncResult<Vec<SyncRun>> {
        let sql = format!(
            "select {RUN_COLUMNS} from sync_runs
             where sync_name = ? and status = 'running'
             order by started_at asc, rowid asc"
        );
        let rows = sqlx::query(&sql)
            .bind(sync_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        rows.into_iter().map(Self::map_run).collect()
    }

    async fn fail_orphaned_runs(&self, reason: &str) -> SyncResult<u64> {
        let result = sqlx::query(
            "update sync_runs
             set status = 'failed', finished_at = ?, error_summary = ?
             where status = 'running'",
        )
        .bind(encode_ts(Utc::now()))
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn reset_sync(&self, sync_name: &str) -> SyncResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        let deleted = sqlx::query("delete from record_mappings where sync_name = ?")
            .bind(sync_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .rows_affected();

        sqlx::query("delete from sync_metadata where sync_name = ?")
            .bind(sync_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        tracing::info!(sync = sync_name, mappings = deleted, "sync state reset");
        Ok(deleted)
    }
}
