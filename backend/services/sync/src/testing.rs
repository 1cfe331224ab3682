//! In-memory stand-ins for the source and destination, shared by the
//! reconciler and coordinator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::StreamExt;

use rowsync_common::{DestinationErrorKind, SyncError, SyncResult};
use rowsync_config::{parse_definitions, SyncDefinition};
use rowsync_db::sync::SqliteMappingStore;
use rowsync_db::IN_MEMORY;
use rowsync_transform::{Payload, SourceRecord};

use crate::destination::DestinationClient;
use crate::source::{RecordSource, RecordStream};

pub const CUSTOMERS_YAML: &str = r#"
syncs:
  - name: customers
    source:
      query: "SELECT * FROM customers WHERE :last_sync_time IS NULL OR updated_at >= :last_sync_time"
      primary_key: id
      updated_at_field: updated_at
    destination:
      table_id: tbl_customers
      external_id_field: s_ext_id
      field_mappings:
        name: title
        email: s_email
        status: s_status
      field_types:
        email:
          type: email
        s_status:
          type: single_select
          value_map:
            1: Active
            0: Inactive
"#;

pub fn customers_definition() -> SyncDefinition {
    parse_definitions(CUSTOMERS_YAML)
        .expect("fixture definition is valid")
        .remove(0)
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid fixture time")
}

pub fn utc(day: u32, hour: u32) -> DateTime<Utc> {
    at(day, hour).and_utc()
}

/// A customer row; `notes` is present in the source but not mapped.
pub fn customer(id: i64, name: &str, status: i64, updated_at: NaiveDateTime) -> SourceRecord {
    SourceRecord::new()
        .with("id", id)
        .with("name", name)
        .with("email", format!("{}@example.com", name.to_lowercase()))
        .with("status", status)
        .with("notes", "internal only")
        .with("updated_at", updated_at)
}

pub async fn memory_store() -> SqliteMappingStore {
    SqliteMappingStore::open(IN_MEMORY)
        .await
        .expect("in-memory store should open")
}

// ── Source ──

#[derive(Default)]
pub struct VecSource {
    rows: Mutex<Vec<SourceRecord>>,
    fail_after: Mutex<Option<usize>>,
    seen_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl VecSource {
    pub fn new(rows: Vec<SourceRecord>) -> Self {
        let source = Self::default();
        source.set_rows(rows);
        source
    }

    pub fn set_rows(&self, rows: Vec<SourceRecord>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn update_row(&self, index: usize, field: &str, value: &str) {
        self.rows.lock().unwrap()[index].insert(field, value);
    }

    /// Emit a source error after `n` rows.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub fn seen_since(&self) -> Vec<Option<DateTime<Utc>>> {
        self.seen_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSource for VecSource {
    fn fetch<'a>(&'a self, _query: &'a str, since: Option<DateTime<Utc>>) -> RecordStream<'a> {
        self.seen_since.lock().unwrap().push(since);
        let mut items: Vec<SyncResult<SourceRecord>> =
            self.rows.lock().unwrap().iter().cloned().map(Ok).collect();
        if let Some(n) = *self.fail_after.lock().unwrap() {
            items.truncate(n);
            items.push(Err(SyncError::Source("connection lost".into())));
        }
        futures::stream::iter(items).boxed()
    }

    async fn ping(&self) -> SyncResult<()> {
        Ok(())
    }
}

// ── Destination ──

#[derive(Default)]
struct FakeState {
    records: HashMap<String, Payload>,
    next_id: u64,
    creates: u64,
    updates: u64,
    failures: VecDeque<DestinationErrorKind>,
}

/// Destination that keeps records in memory.
#[derive(Default)]
pub struct FakeDestination {
    state: Mutex<FakeState>,
    delay: Option<Duration>,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// The next call fails with `kind`.
    pub fn fail_next(&self, kind: DestinationErrorKind) {
        self.state.lock().unwrap().failures.push_back(kind);
    }

    /// Delete a record out-of-band.
    pub fn remove(&self, destination_id: &str) {
        self.state.lock().unwrap().records.remove(destination_id);
    }

    pub fn record(&self, destination_id: &str) -> Option<Payload> {
        self.state.lock().unwrap().records.get(destination_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn creates(&self) -> u64 {
        self.state.lock().unwrap().creates
    }

    pub fn updates(&self) -> u64 {
        self.state.lock().unwrap().updates
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DestinationClient for FakeDestination {
    async fn create(&self, _collection: &str, payload: &Payload) -> SyncResult<String> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.failures.pop_front() {
            return Err(SyncError::destination(kind, "injected failure"));
        }
        state.next_id += 1;
        state.creates += 1;
        let id = format!("rec_{}", state.next_id);
        state.records.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update(
        &self,
        _collection: &str,
        destination_id: &str,
        payload: &Payload,
    ) -> SyncResult<()> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.failures.pop_front() {
            return Err(SyncError::destination(kind, "injected failure"));
        }
        match state.records.get_mut(destination_id) {
            Some(existing) => {
                for (k, v) in payload {
                    existing.insert(k.clone(), v.clone());
                }
                state.updates += 1;
                Ok(())
            }
            None => Err(SyncError::destination(
                DestinationErrorKind::NotFound,
                format!("record {destination_id} not found"),
            )),
        }
    }

    async fn ping(&self) -> SyncResult<()> {
        Ok(())
    }
}
