//! ChangeFeedClient - auto-resubscribing change feed
//!
//! Wraps a raw [`FeedSubscription`] and hides connection churn from the
//! reconciler. When the subscription drops, the client resubscribes with
//! bounded retries and then reports [`FeedItem::Resync`]: events missed
//! during the gap cannot be recovered from the feed itself, so the
//! consumer must re-fetch to correct drift. Retry exhaustion surfaces as
//! [`FeedItem::Lost`] without giving up — the next call starts a fresh
//! retry round.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use shared::feed::ChangeOp;

use crate::remote::{FeedSubscription, RemoteStore, RowFilter, StoreError};

/// What the feed produced next
#[derive(Debug)]
pub enum FeedItem {
    /// A live change event
    Event(shared::feed::ChangeEvent),
    /// The subscription was re-established after a drop; the consumer
    /// must bulk re-fetch before trusting subsequent events
    Resync,
    /// Resubscription retries are exhausted for this round; the view
    /// should surface a transient error while retrying continues
    Lost,
}

/// Auto-resubscribing subscription to one filtered table
pub struct ChangeFeedClient {
    /// Stable identity for this client across resubscriptions (logs)
    client_id: Uuid,
    store: Arc<dyn RemoteStore>,
    table: String,
    filters: Vec<RowFilter>,
    ops: Vec<ChangeOp>,
    sub: Option<FeedSubscription>,
    retry_delay: Duration,
    max_retries: u32,
}

impl ChangeFeedClient {
    /// Open the initial subscription.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        table: &str,
        filters: Vec<RowFilter>,
        ops: Vec<ChangeOp>,
        retry_delay: Duration,
        max_retries: u32,
    ) -> Result<Self, StoreError> {
        let sub = store.subscribe(table, &filters, &ops).await?;
        Ok(Self {
            client_id: Uuid::new_v4(),
            store,
            table: table.to_string(),
            filters,
            ops,
            sub: Some(sub),
            retry_delay,
            max_retries,
        })
    }

    /// Next feed item. Never returns a hard error; connection loss turns
    /// into `Resync`/`Lost` items.
    pub async fn next(&mut self) -> FeedItem {
        if let Some(sub) = self.sub.as_mut() {
            match sub.next().await {
                Some(event) => return FeedItem::Event(event),
                None => {
                    tracing::warn!(
                        client = %self.client_id,
                        table = %self.table,
                        "change feed dropped, resubscribing"
                    );
                    self.sub = None;
                }
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            tokio::time::sleep(self.retry_delay).await;
            match self
                .store
                .subscribe(&self.table, &self.filters, &self.ops)
                .await
            {
                Ok(sub) => {
                    tracing::info!(
                        client = %self.client_id,
                        table = %self.table,
                        attempts,
                        "change feed re-established"
                    );
                    self.sub = Some(sub);
                    return FeedItem::Resync;
                }
                Err(e) if attempts >= self.max_retries => {
                    tracing::error!(
                        table = %self.table,
                        attempts,
                        error = %e,
                        "resubscription retries exhausted"
                    );
                    return FeedItem::Lost;
                }
                Err(e) => {
                    tracing::warn!(
                        table = %self.table,
                        attempt = attempts,
                        error = %e,
                        "resubscription failed, retrying"
                    );
                }
            }
        }
    }

    /// Release the subscription.
    pub fn close(&mut self) {
        if let Some(mut sub) = self.sub.take() {
            sub.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use shared::feed::tables;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn resync_after_disconnect() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = ChangeFeedClient::open(
            store.clone(),
            tables::ORDERS,
            vec![],
            vec![],
            Duration::from_millis(5),
            3,
        )
        .await
        .unwrap();

        store
            .upsert(tables::ORDERS, json!({"id": "o1"}), "id")
            .await
            .unwrap();
        assert!(matches!(feed.next().await, FeedItem::Event(_)));

        store.disconnect_feeds();
        assert!(matches!(feed.next().await, FeedItem::Resync));

        // The fresh subscription is live again.
        store
            .upsert(tables::ORDERS, json!({"id": "o2"}), "id")
            .await
            .unwrap();
        assert!(matches!(feed.next().await, FeedItem::Event(_)));
    }

    /// Store whose subscribe always fails, to exercise retry exhaustion.
    #[derive(Debug, Default)]
    struct DeadStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RemoteStore for DeadStore {
        async fn fetch_all(
            &self,
            _table: &str,
            _filters: &[RowFilter],
            _order: Option<crate::remote::OrderBy>,
            _limit: Option<usize>,
        ) -> Result<Vec<Value>, StoreError> {
            Ok(vec![])
        }

        async fn upsert(
            &self,
            _table: &str,
            record: Value,
            _conflict_key: &str,
        ) -> Result<Value, StoreError> {
            Ok(record)
        }

        async fn update(
            &self,
            _table: &str,
            _filters: &[RowFilter],
            _patch: Value,
        ) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn delete(&self, _table: &str, _filters: &[RowFilter]) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn revision(&self, _table: &str) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn subscribe(
            &self,
            _table: &str,
            _filters: &[RowFilter],
            _ops: &[ChangeOp],
        ) -> Result<FeedSubscription, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Connection("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn lost_after_exhausted_retries_then_keeps_trying() {
        let dead = Arc::new(DeadStore::default());
        let mut feed = ChangeFeedClient {
            client_id: Uuid::new_v4(),
            store: dead.clone(),
            table: tables::ORDERS.to_string(),
            filters: vec![],
            ops: vec![],
            sub: None,
            retry_delay: Duration::from_millis(1),
            max_retries: 3,
        };

        assert!(matches!(feed.next().await, FeedItem::Lost));
        assert_eq!(dead.attempts.load(Ordering::SeqCst), 3);

        // The next call starts a fresh retry round rather than giving up.
        assert!(matches!(feed.next().await, FeedItem::Lost));
        assert_eq!(dead.attempts.load(Ordering::SeqCst), 6);
    }
}
