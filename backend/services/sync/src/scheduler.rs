use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rowsync_common::SyncResult;
use rowsync_config::SyncDefinition;
use rowsync_db::sync::MappingStore;

use crate::coordinator::{RunCoordinator, RunReport};
use crate::destination::DestinationClient;
use crate::source::RecordSource;

/// Registry of sync names with a run in progress.
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run for `sync_name` is already in progress.
    pub fn try_acquire(&self, sync_name: &str) -> Option<RunGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(sync_name.to_owned()) {
            return None;
        }
        Some(RunGuard {
            held: Arc::clone(&self.held),
            sync_name: sync_name.to_owned(),
        })
    }

    #[cfg(test)]
    pub fn is_held(&self, sync_name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(sync_name)
    }
}

/// Releases the sync name when dropped.
pub struct RunGuard {
    held: Arc<Mutex<HashSet<String>>>,
    sync_name: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.sync_name);
    }
}

/// Run once unless another run of the same sync holds the lock.
/// `None` means the run was skipped.
pub async fn run_guarded<M, S, D>(
    coordinator: &RunCoordinator<M, S, D>,
    locks: &RunLocks,
    definition: &SyncDefinition,
    cancel: &CancellationToken,
) -> Option<SyncResult<RunReport>>
where
    M: MappingStore + ?Sized,
    S: RecordSource + ?Sized,
    D: DestinationClient + ?Sized,
{
    let Some(_guard) = locks.try_acquire(&definition.name) else {
        tracing::info!(sync = %definition.name, "previous run still in progress, skipping");
        return None;
    };

    let result = coordinator.run(definition, cancel).await;
    if let Err(e) = &result {
        tracing::error!(sync = %definition.name, error = %e, "sync run could not be recorded");
    }
    Some(result)
}

/// Interval scheduler: one task per definition, ticking every `interval`
/// until `cancel` fires.
pub struct Scheduler<M: ?Sized, S: ?Sized, D: ?Sized> {
    coordinator: Arc<RunCoordinator<M, S, D>>,
    locks: RunLocks,
    interval: Duration,
}

impl<M, S, D> Scheduler<M, S, D>
where
    M: MappingStore + ?Sized + 'static,
    S: RecordSource + ?Sized + 'static,
    D: DestinationClient + ?Sized + 'static,
{
    pub fn new(coordinator: Arc<RunCoordinator<M, S, D>>, locks: RunLocks, interval: Duration) -> Self {
        Self {
            coordinator,
            locks,
            interval,
        }
    }

    /// Returns once every per-sync task has stopped.
    pub async fn run(
        &self,
        definitions: Vec<SyncDefinition>,
        run_immediately: bool,
        cancel: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        for definition in definitions {
            let coordinator = Arc::clone(&self.coordinator);
            let locks = self.locks.clone();
            let cancel = cancel.clone();
            let interval = self.interval;

            tracing::info!(
                sync = %definition.name,
                interval_secs = interval.as_secs(),
                run_immediately,
                "scheduling sync"
            );

            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                if !run_immediately {
                    // The first tick completes immediately.
                    ticker.tick().await;
                }

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    run_guarded(&*coordinator, &locks, &definition, &cancel).await;
                }

                tracing::info!(sync = %definition.name, "scheduler task stopped");
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "scheduler task panicked");
            }
        }
    }
}
