use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use rowsync_common::{DestinationErrorKind, SyncError, SyncResult};
use rowsync_config::SyncDefinition;
use rowsync_db::sync::MappingStore;
use rowsync_transform::{content_hash, transform, SourceRecord};

use crate::destination::DestinationClient;

/// Outcome of reconciling one source row.
#[derive(Debug)]
pub enum Decision {
    Created(String),
    Updated(String),
    Skipped(String),
    /// The row failed; nothing was written for it.
    Failed(SyncError),
}

/// Brings one destination record in line with one source row, using the
/// stored mapping to choose between create, update and skip.
pub struct Reconciler<M: ?Sized, D: ?Sized> {
    store: Arc<M>,
    destination: Arc<D>,
    call_timeout: Duration,
}

impl<M: ?Sized, D: ?Sized> Clone for Reconciler<M, D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            destination: Arc::clone(&self.destination),
            call_timeout: self.call_timeout,
        }
    }
}

impl<M, D> Reconciler<M, D>
where
    M: MappingStore + ?Sized,
    D: DestinationClient + ?Sized,
{
    pub fn new(store: Arc<M>, destination: Arc<D>, call_timeout: Duration) -> Self {
        Self {
            store,
            destination,
            call_timeout,
        }
    }

    /// Reconcile one row. Only storage failures surface as `Err`; every
    /// other problem is a `Decision::Failed` for this row alone.
    pub async fn reconcile(
        &self,
        definition: &SyncDefinition,
        record: &SourceRecord,
    ) -> SyncResult<Decision> {
        let sync = definition.name.as_str();
        let pk_field = definition.source.primary_key.as_str();

        let source_key = match record.get(pk_field) {
            Some(value) if !value.is_null() => match value.to_text() {
                Ok(key) => key,
                Err(e) => {
                    return Ok(Decision::Failed(SyncError::Config(format!(
                        "primary key {pk_field:?} is unusable: {e}"
                    ))))
                }
            },
            _ => {
                return Ok(Decision::Failed(SyncError::Config(format!(
                    "primary key field {pk_field:?} is missing or null"
                ))))
            }
        };

        let dest = &definition.destination;
        let mut payload = match transform(record, &dest.field_mappings, &dest.field_types) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(sync, source_key = %source_key, error = %e, "record transform failed");
                return Ok(Decision::Failed(SyncError::Transform(e.to_string())));
            }
        };
        let hash = content_hash(&payload);

        match self.store.get_mapping(sync, &source_key).await? {
            None => {
                if let Some(field) = &dest.external_id_field {
                    payload.insert(field.clone(), Value::String(source_key.clone()));
                }

                let created = self
                    .with_timeout(self.destination.create(&dest.table_id, &payload))
                    .await;
                let destination_id = match created {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(sync, source_key = %source_key, error = %e, "destination create failed");
                        return Ok(Decision::Failed(e));
                    }
                };

                if let Err(e) = self
                    .store
                    .put_mapping(sync, &source_key, &destination_id, &hash)
                    .await
                {
                    tracing::error!(
                        sync,
                        source_key = %source_key,
                        destination_id = %destination_id,
                        error = %e,
                        "destination record created but mapping not saved"
                    );
                    return Err(e);
                }

                tracing::debug!(sync, source_key = %source_key, destination_id = %destination_id, "created");
                Ok(Decision::Created(destination_id))
            }
            Some(mapping) if mapping.content_hash == hash => {
                tracing::trace!(sync, source_key = %source_key, "unchanged");
                Ok(Decision::Skipped(mapping.destination_id))
            }
            Some(mapping) => {
                let updated = self
                    .with_timeout(self.destination.update(
                        &dest.table_id,
                        &mapping.destination_id,
                        &payload,
                    ))
                    .await;
                if let Err(e) = updated {
                    tracing::warn!(
                        sync,
                        source_key = %source_key,
                        destination_id = %mapping.destination_id,
                        error = %e,
                        "destination update failed"
                    );
                    return Ok(Decision::Failed(e));
                }

                self.store
                    .put_mapping(sync, &source_key, &mapping.destination_id, &hash)
                    .await?;

                tracing::debug!(sync, source_key = %source_key, destination_id = %mapping.destination_id, "updated");
                Ok(Decision::Updated(mapping.destination_id))
            }
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::destination(
                DestinationErrorKind::Transient,
                format!("destination call timed out after {:?}", self.call_timeout),
            )),
        }
    }
}
