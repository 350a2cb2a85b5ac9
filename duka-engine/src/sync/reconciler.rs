//! Reconciler - applies change events to a CollectionStore
//!
//! One reconciler per entity type. The lifecycle is: bulk load into the
//! cache, then consume the change feed; every event application is
//! idempotent and tolerant of replays (see `CollectionStore` staleness
//! guards). After a reconnect the feed cannot replay what was missed, so
//! the reconciler re-fetches and lets the authoritative result win over
//! any unconfirmed local speculation.
//!
//! # Liveness
//!
//! The run loop checks its `CancellationToken` before applying anything;
//! once a view is closed, late events are discarded, never applied.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use shared::feed::{ChangeEvent, ChangeOp};
use shared::models::Keyed;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use super::collection::{ApplyOutcome, CollectionStore};
use super::feed::{ChangeFeedClient, FeedItem};
use crate::common::EngineResult;
use crate::remote::{OrderBy, RemoteStore, RowFilter};

/// Loading/error indicator shared with the presentation handle.
///
/// A failed bulk load sets the error and leaves the previous snapshot
/// visible; it never blanks the view.
#[derive(Debug, Clone, Default)]
pub struct HandleStatus {
    loading: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
}

impl HandleStatus {
    pub fn new_loading() -> Self {
        let status = Self::default();
        status.loading.store(true, Ordering::SeqCst);
        status
    }

    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    pub fn finish_loading(&self) {
        self.loading.store(false, Ordering::SeqCst);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.lock() = Some(message.into());
    }

    pub fn clear_error(&self) {
        *self.error.lock() = None;
    }
}

/// Converts a change event's post-image into a typed record.
///
/// `existing` is the currently cached record for the event's key, for
/// decoders that need to graft state the post-image does not carry
/// (order aggregates graft their line items this way).
#[async_trait]
pub trait RecordDecoder<T>: Send + Sync {
    async fn decode(&self, event: &ChangeEvent, existing: Option<&T>) -> EngineResult<Option<T>>;
}

/// Plain serde decoder for entities whose row is the whole record.
#[derive(Debug, Default)]
pub struct JsonRowDecoder;

#[async_trait]
impl<T> RecordDecoder<T> for JsonRowDecoder
where
    T: DeserializeOwned + Send + Sync,
{
    async fn decode(&self, event: &ChangeEvent, _existing: Option<&T>) -> EngineResult<Option<T>> {
        match &event.after {
            Some(row) => Ok(Some(serde_json::from_value(row.clone())?)),
            None => Ok(None),
        }
    }
}

/// Bulk-loads the full collection from the remote store.
#[async_trait]
pub trait BulkLoader<T>: Send + Sync {
    async fn load(&self, store: &dyn RemoteStore) -> EngineResult<Vec<T>>;
}

/// Single-table loader for entities whose row is the whole record.
#[derive(Debug)]
pub struct JsonLoader {
    pub table: String,
    pub filters: Vec<RowFilter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

#[async_trait]
impl<T> BulkLoader<T> for JsonLoader
where
    T: DeserializeOwned + Send + Sync,
{
    async fn load(&self, store: &dyn RemoteStore) -> EngineResult<Vec<T>> {
        let rows = store
            .fetch_all(&self.table, &self.filters, self.order.clone(), self.limit)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(serde_json::from_value(row)?);
        }
        Ok(records)
    }
}

/// Applies one entity type's change stream to its cache
pub struct Reconciler<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    store: Arc<dyn RemoteStore>,
    cache: Arc<CollectionStore<T>>,
    table: String,
    loader: Arc<dyn BulkLoader<T>>,
    decoder: Arc<dyn RecordDecoder<T>>,
}

impl<T> Reconciler<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<CollectionStore<T>>,
        table: &str,
        loader: Arc<dyn BulkLoader<T>>,
        decoder: Arc<dyn RecordDecoder<T>>,
    ) -> Self {
        Self {
            store,
            cache,
            table: table.to_string(),
            loader,
            decoder,
        }
    }

    pub fn cache(&self) -> Arc<CollectionStore<T>> {
        self.cache.clone()
    }

    /// Bulk fetch and replace the cache. Returns the keys whose
    /// unconfirmed speculation was discarded by the authoritative state.
    ///
    /// The revision watermark is read before the fetch: an event that
    /// commits during the fetch carries a higher revision and will be
    /// applied on top, while anything at or below the watermark is
    /// already in the fetched rows.
    pub async fn load(&self) -> EngineResult<Vec<String>> {
        let watermark = self.store.revision(&self.table).await?;
        let records = self.loader.load(self.store.as_ref()).await?;
        let reverted = self.cache.bulk_replace(records, watermark);
        if !reverted.is_empty() {
            tracing::warn!(
                table = %self.table,
                keys = ?reverted,
                "optimistic updates reverted by authoritative fetch"
            );
        }
        Ok(reverted)
    }

    /// Apply one change event under the idempotent policy:
    /// insert/update upsert by key, delete removes by key, stale replays
    /// are no-ops.
    pub async fn apply(&self, event: &ChangeEvent) -> EngineResult<ApplyOutcome> {
        match event.op {
            ChangeOp::Delete => Ok(self.cache.remove_confirmed(&event.key, event.revision)),
            ChangeOp::Insert | ChangeOp::Update => {
                // Cheap staleness check before decoding (decoders may hit
                // the store to hydrate).
                if self.cache.is_stale(&event.key, event.revision) {
                    return Ok(ApplyOutcome::Stale);
                }
                let existing = self.cache.get(&event.key);
                match self.decoder.decode(event, existing.as_ref()).await? {
                    Some(record) => Ok(self.cache.apply_confirmed(
                        &event.key,
                        record,
                        event.revision,
                        event.op,
                    )),
                    None => Ok(ApplyOutcome::Stale),
                }
            }
        }
    }

    /// Initial load plus feed consumption until cancelled. Services with
    /// no extra startup work spawn this once.
    pub async fn run(
        &self,
        feed: ChangeFeedClient,
        cancel: CancellationToken,
        status: HandleStatus,
    ) {
        match self.load().await {
            Ok(_) => status.clear_error(),
            Err(e) => {
                tracing::error!(table = %self.table, error = %e, "initial load failed");
                status.set_error(e.to_string());
            }
        }
        status.finish_loading();
        self.consume(feed, cancel, status).await;
    }

    /// Consume the feed until cancelled (the initial load already
    /// happened elsewhere).
    pub async fn consume(
        &self,
        mut feed: ChangeFeedClient,
        cancel: CancellationToken,
        status: HandleStatus,
    ) {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = feed.next() => item,
            };
            // Checked again so an event that raced the cancellation is
            // discarded, not applied.
            if cancel.is_cancelled() {
                break;
            }
            match item {
                FeedItem::Event(event) => match self.apply(&event).await {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            table = %self.table,
                            key = %event.key,
                            error = %e,
                            "failed to apply change event"
                        );
                    }
                },
                FeedItem::Resync => match self.load().await {
                    Ok(_) => status.clear_error(),
                    Err(e) => {
                        tracing::error!(table = %self.table, error = %e, "resync fetch failed");
                        status.set_error(e.to_string());
                    }
                },
                FeedItem::Lost => {
                    status.set_error("realtime connection lost, retrying");
                }
            }
        }
        feed.close();
        tracing::debug!(table = %self.table, "reconciler stopped");
    }
}
