use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rowsync_common::{SyncError, SyncResult};
use rowsync_config::{load_definitions, AppConfig, StateSettings, SyncDefinition};
use rowsync_db::sync::{MappingStore, SqliteMappingStore};

use crate::coordinator::RunCoordinator;
use crate::destination::smartsuite::SmartSuiteClientConfig;
use crate::destination::{DestinationClient, SmartSuiteClient};
use crate::reconcile::Reconciler;
use crate::scheduler::{run_guarded, RunLocks, Scheduler};
use crate::source::{MySqlSource, RecordSource};
use crate::status;

const ORPHAN_REASON: &str = "interrupted: process exited while running";

type Coordinator = RunCoordinator<dyn MappingStore, dyn RecordSource, dyn DestinationClient>;

async fn open_store(state: &StateSettings) -> SyncResult<Arc<dyn MappingStore>> {
    let store = SqliteMappingStore::open(&state.state_db_path).await?;
    Ok(Arc::new(store))
}

fn destination_client(config: SmartSuiteClientConfig) -> SyncResult<SmartSuiteClient> {
    SmartSuiteClient::new(config)
        .map_err(|e| SyncError::Internal(format!("failed to build http client: {e}")))
}

/// Mark runs left `running` by a previous process as failed. Only safe when
/// no other rowsync process is working on the same state database.
async fn sweep_orphans(store: &dyn MappingStore) -> SyncResult<()> {
    let swept = store.fail_orphaned_runs(ORPHAN_REASON).await?;
    if swept > 0 {
        tracing::warn!(runs = swept, "marked orphaned runs as failed");
    }
    Ok(())
}

/// Wire source and destination from the environment around `store`.
async fn build_coordinator(
    config: &AppConfig,
    store: Arc<dyn MappingStore>,
) -> SyncResult<Arc<Coordinator>> {
    let client_config = SmartSuiteClientConfig::from(&config.destination);
    let call_budget = client_config.call_budget();

    let source: Arc<dyn RecordSource> = Arc::new(MySqlSource::connect(&config.mysql).await?);
    let destination: Arc<dyn DestinationClient> = Arc::new(destination_client(client_config)?);
    let reconciler = Reconciler::new(Arc::clone(&store), destination, call_budget);

    Ok(Arc::new(RunCoordinator::new(store, source, reconciler)))
}

/// Cancel `token` on ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight records");
            token.cancel();
        }
    });
}

fn select_definitions(
    definitions: Vec<SyncDefinition>,
    sync_name: Option<&str>,
) -> SyncResult<Vec<SyncDefinition>> {
    match sync_name {
        Some(name) => {
            let def = definitions
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| SyncError::NotFound(format!("sync {name:?} is not defined")))?;
            if !def.enabled {
                tracing::warn!(sync = name, "sync is disabled but was requested by name");
            }
            Ok(vec![def])
        }
        None => Ok(definitions.into_iter().filter(|d| d.enabled).collect()),
    }
}

/// Tally of one `run` invocation.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunTally {
    failed: usize,
    busy: usize,
}

/// Run each definition once. A sync with a `running` row in the store is
/// left alone: another process may own it.
async fn run_each<M, S, D>(
    store: &M,
    coordinator: &RunCoordinator<M, S, D>,
    locks: &RunLocks,
    definitions: &[SyncDefinition],
    cancel: &CancellationToken,
) -> SyncResult<RunTally>
where
    M: MappingStore + ?Sized,
    S: RecordSource + ?Sized,
    D: DestinationClient + ?Sized,
{
    let mut tally = RunTally::default();

    for definition in definitions {
        if cancel.is_cancelled() {
            break;
        }

        let live = store.running_runs(&definition.name).await?;
        if let Some(other) = live.first() {
            tracing::warn!(
                sync = %definition.name,
                run_id = %other.id,
                started_at = %other.started_at,
                "sync already has a run in progress, skipping; use --recover if its process is gone"
            );
            tally.busy += 1;
            continue;
        }

        match run_guarded(coordinator, locks, definition, cancel).await {
            Some(Ok(report)) if report.succeeded() => {}
            Some(_) => tally.failed += 1,
            None => tally.busy += 1,
        }
    }

    Ok(tally)
}

pub async fn run_once(
    config_path: &Path,
    sync_name: Option<&str>,
    recover: bool,
) -> SyncResult<ExitCode> {
    let definitions = select_definitions(load_definitions(config_path)?, sync_name)?;
    if definitions.is_empty() {
        tracing::warn!("no enabled syncs to run");
        return Ok(ExitCode::SUCCESS);
    }

    let config = AppConfig::from_env()?;
    let store = open_store(&config.state).await?;
    if recover {
        sweep_orphans(&*store).await?;
    }
    let coordinator = build_coordinator(&config, Arc::clone(&store)).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let tally = run_each(&*store, &*coordinator, &RunLocks::new(), &definitions, &cancel).await?;

    tracing::info!(
        syncs = definitions.len(),
        failed = tally.failed,
        skipped_busy = tally.busy,
        "run finished"
    );
    Ok(if tally.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn schedule(
    config_path: &Path,
    interval_minutes: Option<u64>,
    run_immediately: bool,
) -> SyncResult<ExitCode> {
    let definitions = select_definitions(load_definitions(config_path)?, None)?;
    if definitions.is_empty() {
        return Err(SyncError::Config("no enabled syncs to schedule".to_owned()));
    }

    let config = AppConfig::from_env()?;
    let minutes = interval_minutes.unwrap_or(config.state.sync_interval_minutes);
    if minutes == 0 {
        return Err(SyncError::Config("interval must be at least 1 minute".to_owned()));
    }

    let store = open_store(&config.state).await?;
    sweep_orphans(&*store).await?;
    let coordinator = build_coordinator(&config, store).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    tracing::info!(syncs = definitions.len(), interval_minutes = minutes, "scheduler starting");
    Scheduler::new(coordinator, RunLocks::new(), Duration::from_secs(minutes * 60))
        .run(definitions, run_immediately, cancel)
        .await;
    tracing::info!("scheduler stopped");

    Ok(ExitCode::SUCCESS)
}

pub fn validate(config_path: &Path) -> SyncResult<ExitCode> {
    let definitions = load_definitions(config_path)?;

    println!("{}: {} sync(s) defined", config_path.display(), definitions.len());
    for def in &definitions {
        println!(
            "  {} [{}] table={} fields={} incremental={} policy={:?}",
            def.name,
            if def.enabled { "enabled" } else { "disabled" },
            def.destination.table_id,
            def.destination.field_mappings.len(),
            def.source.updated_at_field.as_deref().unwrap_or("-"),
            def.watermark_policy,
        );
    }
    tracing::info!(count = definitions.len(), "configuration valid");
    Ok(ExitCode::SUCCESS)
}

pub async fn status(config_path: &Path, limit: u32) -> SyncResult<ExitCode> {
    let definitions = load_definitions(config_path)?;
    let state = StateSettings::from_env()?;
    let store = open_store(&state).await?;

    for def in &definitions {
        let snapshot = status::collect(&*store, def, limit).await?;
        print!("{}", status::render(&snapshot));
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn check() -> SyncResult<ExitCode> {
    let config = AppConfig::from_env()?;
    let mut healthy = true;

    match MySqlSource::connect(&config.mysql).await {
        Ok(source) => match source.ping().await {
            Ok(()) => tracing::info!(target_db = %config.mysql.redacted(), "mysql connection ok"),
            Err(e) => {
                healthy = false;
                tracing::error!(error = %e, "mysql query failed");
            }
        },
        Err(e) => {
            healthy = false;
            tracing::error!(error = %e, "mysql connection failed");
        }
    }

    match destination_client(SmartSuiteClientConfig::from(&config.destination))?
        .ping()
        .await
    {
        Ok(()) => tracing::info!(base_url = %config.destination.base_url, "smartsuite connection ok"),
        Err(e) => {
            healthy = false;
            tracing::error!(error = %e, "smartsuite connection failed");
        }
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn reset(config_path: &Path, sync_name: &str) -> SyncResult<ExitCode> {
    match load_definitions(config_path) {
        Ok(defs) if !defs.iter().any(|d| d.name == sync_name) => {
            tracing::warn!(sync = sync_name, "sync is not in the configuration file");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not read configuration, resetting anyway"),
    }

    let state = StateSettings::from_env()?;
    let store = open_store(&state).await?;
    if !store.running_runs(sync_name).await?.is_empty() {
        return Err(SyncError::Config(format!(
            "sync {sync_name:?} has a run in progress; stop it before resetting"
        )));
    }

    let removed = store.reset_sync(sync_name).await?;
    println!("reset {sync_name}: removed {removed} mapping(s) and the watermark");
    Ok(ExitCode::SUCCESS)
}
