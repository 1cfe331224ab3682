use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

use rowsync_common::SyncResult;
use rowsync_config::SyncDefinition;
use rowsync_db::sync::{MappingStore, SyncRun};

/// Read-only view of one sync's persisted state.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub sync_name: String,
    pub enabled: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub mappings: u64,
    pub running: usize,
    pub recent_runs: Vec<SyncRun>,
}

pub async fn collect<M>(store: &M, definition: &SyncDefinition, limit: u32) -> SyncResult<SyncStatus>
where
    M: MappingStore + ?Sized,
{
    let name = definition.name.as_str();
    let metadata = store.get_metadata(name).await?;

    Ok(SyncStatus {
        sync_name: definition.name.clone(),
        enabled: definition.enabled,
        last_sync_time: metadata.as_ref().and_then(|m| m.last_sync_time),
        last_run_at: metadata.as_ref().and_then(|m| m.last_run_at),
        mappings: store.count_mappings(name).await?,
        running: store.running_runs(name).await?.len(),
        recent_runs: store.recent_runs(name, limit).await?,
    })
}

fn ts(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "never".to_owned())
}

pub fn render(status: &SyncStatus) -> String {
    let mut out = String::new();
    let state = if status.enabled { "enabled" } else { "disabled" };
    let _ = writeln!(out, "{} ({state})", status.sync_name);
    let _ = writeln!(out, "  last sync time: {}", ts(status.last_sync_time));
    let _ = writeln!(out, "  last run at:    {}", ts(status.last_run_at));
    let _ = writeln!(out, "  mapped records: {}", status.mappings);
    if status.running > 0 {
        let _ = writeln!(out, "  running now:    {}", status.running);
    }

    if status.recent_runs.is_empty() {
        let _ = writeln!(out, "  no runs recorded");
    }
    for run in &status.recent_runs {
        let _ = write!(
            out,
            "  {} {:<8} {}",
            ts(Some(run.started_at)),
            run.status.as_str(),
            run.counts
        );
        if let Some(err) = &run.error_summary {
            let _ = write!(out, " error={err}");
        }
        out.push('\n');
    }
    out
}
