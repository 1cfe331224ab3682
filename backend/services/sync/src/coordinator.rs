use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rowsync_common::{SyncError, SyncResult};
use rowsync_config::{SyncDefinition, WatermarkPolicy};
use rowsync_db::sync::{MappingStore, RunCounts, RunStatus};

use crate::destination::DestinationClient;
use crate::reconcile::{Decision, Reconciler};
use crate::source::RecordSource;

pub const CANCELLED: &str = "cancelled";

/// Summary of one finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub sync_name: String,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

enum Outcome {
    Completed,
    Cancelled,
    Aborted(SyncError),
}

/// Timestamps seen during a run, for computing the next watermark.
#[derive(Default)]
struct WatermarkTracker {
    newest: Option<DateTime<Utc>>,
    oldest_failed: Option<DateTime<Utc>>,
    failed_without_timestamp: bool,
}

impl WatermarkTracker {
    fn observe(&mut self, ts: Option<DateTime<Utc>>, failed: bool) {
        if let Some(ts) = ts {
            self.newest = self.newest.max(Some(ts));
        }
        if failed {
            match ts {
                Some(ts) => {
                    self.oldest_failed = Some(self.oldest_failed.map_or(ts, |cur| cur.min(ts)))
                }
                None => self.failed_without_timestamp = true,
            }
        }
    }

    /// Candidate watermark for a completed run; `None` leaves it unchanged.
    fn next(
        &self,
        incremental: bool,
        policy: WatermarkPolicy,
        started_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let advance_to = if incremental { self.newest } else { Some(started_at) };

        match policy {
            WatermarkPolicy::Advance => advance_to,
            WatermarkPolicy::HoldOnError if self.failed_without_timestamp => None,
            WatermarkPolicy::HoldOnError => match self.oldest_failed {
                Some(failed) if incremental => advance_to.map(|a| a.min(failed)),
                Some(_) => None,
                None => advance_to,
            },
        }
    }
}

/// Drives one sync run from source stream to terminal run record.
pub struct RunCoordinator<M: ?Sized, S: ?Sized, D: ?Sized> {
    store: Arc<M>,
    source: Arc<S>,
    reconciler: Reconciler<M, D>,
}

impl<M, S, D> RunCoordinator<M, S, D>
where
    M: MappingStore + ?Sized,
    S: RecordSource + ?Sized,
    D: DestinationClient + ?Sized,
{
    pub fn new(store: Arc<M>, source: Arc<S>, reconciler: Reconciler<M, D>) -> Self {
        Self {
            store,
            source,
            reconciler,
        }
    }

    /// Execute one run. `Err` only when the run could not be opened or its
    /// terminal state could not be recorded.
    pub async fn run(
        &self,
        definition: &SyncDefinition,
        cancel: &CancellationToken,
    ) -> SyncResult<RunReport> {
        let sync = definition.name.as_str();
        let watermark_before = self.store.get_last_sync_time(sync).await?;
        let run_id = self.store.begin_run(sync).await?;
        let started_at = Utc::now();

        tracing::info!(
            sync,
            run_id = %run_id,
            since = ?watermark_before,
            "sync run started"
        );

        let updated_at_field = definition.source.updated_at_field.as_deref();
        let mut counts = RunCounts::default();
        let mut tracker = WatermarkTracker::default();
        let mut dropped: u64 = 0;

        let outcome = {
            let mut rows = self.source.fetch(&definition.source.query, watermark_before);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Outcome::Cancelled,
                    next = rows.next() => next,
                };

                let record = match next {
                    None => break Outcome::Completed,
                    Some(Err(e)) => break Outcome::Aborted(e),
                    Some(Ok(record)) => record,
                };

                let ts = updated_at_field
                    .and_then(|f| record.get(f))
                    .and_then(|v| v.as_timestamp());
                if let (Some(wm), Some(ts)) = (watermark_before, ts) {
                    if ts < wm {
                        dropped += 1;
                        continue;
                    }
                }

                counts.processed += 1;
                let decision = match self.reconciler.reconcile(definition, &record).await {
                    Ok(d) => d,
                    Err(e) if e.is_fatal_to_run() => break Outcome::Aborted(e),
                    Err(e) => Decision::Failed(e),
                };

                let failed = matches!(decision, Decision::Failed(_));
                match decision {
                    Decision::Created(_) => counts.created += 1,
                    Decision::Updated(_) => counts.updated += 1,
                    Decision::Skipped(_) => counts.skipped += 1,
                    Decision::Failed(e) => {
                        counts.errored += 1;
                        tracing::warn!(sync, run_id = %run_id, error = %e, "record failed");
                    }
                }
                tracker.observe(ts, failed);
            }
        };

        if dropped > 0 {
            tracing::debug!(sync, dropped, "rows older than watermark dropped");
        }

        let (status, error, watermark_after) = match outcome {
            Outcome::Completed => {
                let candidate = tracker.next(
                    updated_at_field.is_some(),
                    definition.watermark_policy,
                    started_at,
                );
                // Success and watermark are written together or not at all.
                if let Err(e) = self.store.complete_run(run_id, sync, counts, candidate).await {
                    tracing::error!(sync, run_id = %run_id, error = %e, "could not record run success");
                    let summary = e.to_string();
                    if let Err(mark) = self
                        .store
                        .finish_run(run_id, RunStatus::Failed, counts, Some(&summary))
                        .await
                    {
                        tracing::warn!(sync, run_id = %run_id, error = %mark, "could not mark run failed");
                    }
                    return Err(e);
                }
                (RunStatus::Success, None, watermark_before.max(candidate))
            }
            Outcome::Cancelled => (RunStatus::Failed, Some(CANCELLED.to_owned()), watermark_before),
            Outcome::Aborted(e) => (RunStatus::Failed, Some(e.to_string()), watermark_before),
        };

        if status != RunStatus::Success {
            self.store
                .finish_run(run_id, status, counts, error.as_deref())
                .await?;
        }

        match status {
            RunStatus::Success => tracing::info!(
                sync,
                run_id = %run_id,
                processed = counts.processed,
                created = counts.created,
                updated = counts.updated,
                skipped = counts.skipped,
                errored = counts.errored,
                watermark = ?watermark_after,
                "sync run succeeded"
            ),
            _ => tracing::error!(
                sync,
                run_id = %run_id,
                processed = counts.processed,
                errored = counts.errored,
                error = error.as_deref().unwrap_or(""),
                "sync run failed"
            ),
        }

        Ok(RunReport {
            run_id,
            sync_name: definition.name.clone(),
            status,
            counts,
            watermark_before,
            watermark_after,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        at, customer, customers_definition, memory_store, utc, FakeDestination, VecSource,
    };
    use rowsync_common::DestinationErrorKind;
    use rowsync_db::sync::SqliteMappingStore;
    use std::time::Duration;

    type TestCoordinator = RunCoordinator<SqliteMappingStore, VecSource, FakeDestination>;

    struct Harness {
        store: Arc<SqliteMappingStore>,
        source: Arc<VecSource>,
        dest: Arc<FakeDestination>,
        coordinator: TestCoordinator,
    }

    async fn harness(rows: Vec<rowsync_transform::SourceRecord>) -> Harness {
        harness_with(rows, FakeDestination::new()).await
    }

    async fn harness_with(
        rows: Vec<rowsync_transform::SourceRecord>,
        dest: FakeDestination,
    ) -> Harness {
        let store = Arc::new(memory_store().await);
        let source = Arc::new(VecSource::new(rows));
        let dest = Arc::new(dest);
        let reconciler =
            Reconciler::new(Arc::clone(&store), Arc::clone(&dest), Duration::from_secs(5));
        let coordinator = RunCoordinator::new(Arc::clone(&store), Arc::clone(&source), reconciler);
        Harness {
            store,
            source,
            dest,
            coordinator,
        }
    }

    fn five_customers() -> Vec<rowsync_transform::SourceRecord> {
        vec![
            customer(1, "Ada", 1, at(1, 8)),
            customer(2, "Grace", 1, at(1, 9)),
            customer(3, "Linus", 0, at(1, 10)),
            customer(4, "Barbara", 1, at(1, 11)),
            customer(5, "Ken", 1, at(1, 12)),
        ]
    }

    async fn run(h: &Harness) -> RunReport {
        run_def(h, &customers_definition()).await
    }

    async fn run_def(h: &Harness, def: &SyncDefinition) -> RunReport {
        h.coordinator
            .run(def, &CancellationToken::new())
            .await
            .expect("run should be recorded")
    }

    fn full_sync_definition() -> SyncDefinition {
        let mut def = customers_definition();
        def.source.updated_at_field = None;
        def
    }

    #[tokio::test]
    async fn five_row_lifecycle() {
        let h = harness(five_customers()).await;
        let def = full_sync_definition();

        let first = run_def(&h, &def).await;
        assert!(first.succeeded());
        assert_eq!(first.counts.created, 5);
        assert_eq!(first.counts.processed, 5);
        assert_eq!(first.watermark_before, None);
        assert!(first.watermark_after.is_some());
        assert_eq!(h.dest.len(), 5);

        let second = run_def(&h, &def).await;
        assert_eq!(second.counts.skipped, 5);
        assert_eq!(second.counts.created + second.counts.updated, 0);

        h.source.update_row(2, "name", "Linus T");
        let third = run_def(&h, &def).await;
        assert_eq!(third.counts.updated, 1);
        assert_eq!(third.counts.skipped, 4);
        assert_eq!(third.counts.errored, 0);

        let row3 = h.store.get_mapping("customers", "3").await.unwrap().unwrap();
        h.dest.remove(&row3.destination_id);
        h.source.update_row(2, "name", "Linus Torvalds");
        let fourth = run_def(&h, &def).await;
        assert!(fourth.succeeded());
        assert_eq!(fourth.counts.errored, 1);
        assert_eq!(fourth.counts.skipped, 4);
        assert_eq!(h.dest.creates(), 5);
        assert_eq!(h.store.count_mappings("customers").await.unwrap(), 5);

        let runs = h.store.recent_runs("customers", 10).await.unwrap();
        assert_eq!(runs.len(), 4);
        assert!(runs.iter().all(|r| r.status == RunStatus::Success));
    }

    #[tokio::test]
    async fn watermark_is_passed_to_source_and_never_regresses() {
        let h = harness(five_customers()).await;
        run(&h).await;

        h.source.set_rows(vec![customer(1, "Ada", 1, at(1, 8))]);
        let report = run(&h).await;
        assert_eq!(report.watermark_before, Some(utc(1, 12)));
        assert_eq!(report.watermark_after, Some(utc(1, 12)));
        assert_eq!(report.counts.processed, 0, "row below watermark is dropped");

        assert_eq!(h.source.seen_since(), vec![None, Some(utc(1, 12))]);
        assert_eq!(
            h.store.get_last_sync_time("customers").await.unwrap(),
            Some(utc(1, 12))
        );
    }

    #[tokio::test]
    async fn rows_without_timestamp_are_included_and_hold_watermark() {
        let rows = vec![customer(1, "Ada", 1, at(1, 8)).with("updated_at", Option::<i64>::None)];
        let h = harness(rows).await;

        let report = run(&h).await;
        assert_eq!(report.counts.created, 1);
        assert_eq!(report.watermark_after, None);
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_sync_advances_to_run_start() {
        let h = harness(five_customers()).await;
        let def = full_sync_definition();

        let before = Utc::now();
        let report = h.coordinator.run(&def, &CancellationToken::new()).await.unwrap();
        let wm = report.watermark_after.expect("advanced");
        assert!(wm >= before && wm <= Utc::now());
    }

    #[tokio::test]
    async fn record_failures_do_not_stop_the_run() {
        let h = harness(five_customers()).await;
        h.dest.fail_next(DestinationErrorKind::Permanent);

        let report = run(&h).await;
        assert!(report.succeeded());
        assert_eq!(report.counts.errored, 1);
        assert_eq!(report.counts.created, 4);
        assert_eq!(report.watermark_after, Some(utc(1, 12)));
    }

    #[tokio::test]
    async fn hold_on_error_stops_at_oldest_failed_row() {
        let h = harness(five_customers()).await;
        let mut def = customers_definition();
        def.watermark_policy = WatermarkPolicy::HoldOnError;

        run(&h).await;
        // Row 2 (index 1) fails, row 4 (index 3) succeeds.
        h.source.set_rows({
            let mut rows = five_customers();
            rows[1].insert("name", "changed");
            rows[1].insert("updated_at", at(2, 9));
            rows[3].insert("name", "changed");
            rows[3].insert("updated_at", at(2, 11));
            rows
        });
        h.dest.fail_next(DestinationErrorKind::Transient);

        let report = h.coordinator.run(&def, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.counts.errored, 1);
        assert_eq!(report.counts.updated, 1);
        assert_eq!(report.watermark_after, Some(utc(2, 9)));
    }

    #[tokio::test]
    async fn source_error_fails_run_and_keeps_counts() {
        let h = harness(five_customers()).await;
        h.source.fail_after(2);

        let report = run(&h).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.counts.created, 2);
        assert!(report.error.as_deref().unwrap_or("").contains("connection lost"));
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());

        let stored = h.store.get_run(report.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.counts, report.counts);
    }

    #[tokio::test]
    async fn storage_error_fails_run() {
        let h = harness(five_customers()).await;
        sqlx::query("drop table record_mappings")
            .execute(h.store.pool())
            .await
            .unwrap();

        let report = run(&h).await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.counts.processed, 1);
        assert!(report.error.unwrap().contains("storage"));
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_run_fails_without_advancing() {
        let h = harness(five_customers()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.coordinator.run(&customers_definition(), &cancel).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.error.as_deref(), Some(CANCELLED));
        assert_eq!(report.counts.processed, 0);
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());
        assert_eq!(h.dest.len(), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_run_lets_in_flight_row_finish() {
        let h = harness_with(
            five_customers(),
            FakeDestination::with_delay(Duration::from_millis(50)),
        )
        .await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(75)).await;
            trigger.cancel();
        });

        let report = h.coordinator.run(&customers_definition(), &cancel).await.unwrap();
        assert_eq!(report.error.as_deref(), Some(CANCELLED));
        assert!(report.counts.created >= 1 && report.counts.created < 5);
        assert_eq!(
            h.store.count_mappings("customers").await.unwrap(),
            report.counts.created
        );
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_closed_elsewhere_does_not_advance_watermark() {
        let h = harness_with(
            five_customers(),
            FakeDestination::with_delay(Duration::from_millis(30)),
        )
        .await;

        let sweeper = Arc::clone(&h.store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(45)).await;
            sweeper.fail_orphaned_runs("interrupted").await.unwrap();
        });

        let err = h
            .coordinator
            .run(&customers_definition(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already failed"), "got: {err}");
        assert!(h.store.get_last_sync_time("customers").await.unwrap().is_none());

        let runs = h.store.recent_runs("customers", 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error_summary.as_deref(), Some("interrupted"));
    }

    #[test]
    fn tracker_policies() {
        let mut t = WatermarkTracker::default();
        t.observe(Some(utc(1, 8)), false);
        t.observe(Some(utc(1, 10)), true);
        t.observe(Some(utc(1, 12)), false);
        let start = utc(9, 0);

        assert_eq!(t.next(true, WatermarkPolicy::Advance, start), Some(utc(1, 12)));
        assert_eq!(t.next(true, WatermarkPolicy::HoldOnError, start), Some(utc(1, 10)));
        assert_eq!(t.next(false, WatermarkPolicy::Advance, start), Some(start));
        assert_eq!(t.next(false, WatermarkPolicy::HoldOnError, start), None);

        t.observe(None, true);
        assert_eq!(t.next(true, WatermarkPolicy::HoldOnError, start), None);
    }
}
