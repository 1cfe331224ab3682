pub mod sync;

use std::str::FromStr;

use rowsync_common::{SyncError, SyncResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

pub const IN_MEMORY: &str = ":memory:";

/// Open the SQLite state database at `path`, creating the file if missing.
///
/// File databases run in WAL mode with `synchronous=FULL` so every committed
/// write is on disk before the call returns. `":memory:"` gives a private
/// single-connection database for tests.
pub async fn create_pool(path: &str) -> SyncResult<SqlitePool> {
    tracing::info!(path, "opening state database");

    if path == IN_MEMORY {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()));
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))
}

/// Create the state tables and indexes if they do not exist yet.
pub async fn bootstrap(pool: &SqlitePool) -> SyncResult<()> {
    const SCHEMA: &[&str] = &[
        "create table if not exists record_mappings (
           sync_name text not null,
           source_key text not null,
           destination_id text not null,
           content_hash text not null,
           created_at text not null,
           updated_at text not null
         )",
        "create unique index if not exists record_mappings_sync_key_uidx
         on record_mappings(sync_name, source_key)",
        "create table if not exists sync_runs (
           id text primary key,
           sync_name text not null,
           started_at text not null,
           finished_at text,
           status text not null default 'running',
           processed integer not null default 0,
           created integer not null default 0,
           updated integer not null default 0,
           skipped integer not null default 0,
           errored integer not null default 0,
           error_summary text
         )",
        "create index if not exists sync_runs_name_started_idx
         on sync_runs(sync_name, started_at)",
        "create table if not exists sync_metadata (
           sync_name text primary key,
           last_sync_time text,
           last_run_at text
         )",
    ];

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
    }

    tracing::debug!("state schema ready");
    Ok(())
}
