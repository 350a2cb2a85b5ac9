//! Notifications service
//!
//! Live view of admin-to-merchant notifications: mark-read (single and
//! batch), delete, and the derived unread count. The initial fetch is
//! capped to the 50 most recent; the feed keeps the window current.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use shared::feed::tables;
use shared::models::Notification;

use super::CollectionHandle;
use crate::common::EngineResult;
use crate::core::EngineState;
use crate::projections::unread_count;
use crate::remote::{OrderBy, RowFilter};
use crate::sync::{
    ChangeFeedClient, CollectionStore, HandleStatus, JsonLoader, JsonRowDecoder, Mutation,
    OptimisticMutator, Reconciler, WriteOp,
};

/// Most-recent window fetched on load; the feed keeps it current.
const FETCH_LIMIT: usize = 50;

fn sort_newest_first(notifications: &mut Vec<Notification>) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Live notifications view for one merchant
pub struct NotificationsService {
    state: EngineState,
    cache: Arc<CollectionStore<Notification>>,
    mutator: OptimisticMutator<Notification>,
    status: HandleStatus,
    cancel: CancellationToken,
}

impl NotificationsService {
    pub async fn start(state: &EngineState, merchant_id: &str) -> EngineResult<Self> {
        let store = state.store();
        let cache = Arc::new(CollectionStore::new());
        let status = HandleStatus::new_loading();
        let cancel = state.scope_token();
        let filters = vec![RowFilter::eq("merchant_id", merchant_id)];

        let feed = ChangeFeedClient::open(
            store.clone(),
            tables::NOTIFICATIONS,
            filters.clone(),
            vec![],
            Duration::from_millis(state.config.feed_retry_delay_ms),
            state.config.feed_max_retries,
        )
        .await?;

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            cache.clone(),
            tables::NOTIFICATIONS,
            Arc::new(JsonLoader {
                table: tables::NOTIFICATIONS.to_string(),
                filters,
                order: Some(OrderBy::desc("created_at")),
                limit: Some(FETCH_LIMIT),
            }),
            Arc::new(JsonRowDecoder),
        ));

        {
            let reconciler = reconciler.clone();
            let cancel = cancel.clone();
            let status = status.clone();
            tokio::spawn(async move {
                reconciler.run(feed, cancel, status).await;
            });
        }

        let mutator = OptimisticMutator::new(
            store,
            cache.clone(),
            tables::NOTIFICATIONS,
            "id",
            Duration::from_millis(state.config.confirm_timeout_ms),
        );

        Ok(Self {
            state: state.clone(),
            cache,
            mutator,
            status,
            cancel,
        })
    }

    pub fn handle(&self) -> CollectionHandle<Notification> {
        CollectionHandle::new(self.cache.clone(), self.status.clone(), sort_newest_first)
    }

    /// Current notifications, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.handle().items()
    }

    /// Count of unread notifications in the current snapshot.
    pub fn unread_count(&self) -> usize {
        unread_count(&self.cache.snapshot())
    }

    /// Mark one notification read. Reading is monotonic: marking an
    /// already-read notification is a local no-op.
    pub async fn mark_read(&self, id: &str) -> EngineResult<()> {
        if self.cache.get(id).map(|n| n.is_read).unwrap_or(false) {
            return Ok(());
        }
        self.mutator
            .mutate(id, |notification| {
                let mut updated = notification.clone();
                updated.is_read = true;
                Ok(Mutation {
                    write: WriteOp::Patch(json!({"is_read": true})),
                    record: updated,
                })
            })
            .await?;
        Ok(())
    }

    /// Mark every unread notification read with a single remote write.
    /// All speculative entries roll back together if the write fails.
    pub async fn mark_all_read(&self) -> EngineResult<()> {
        let unread: Vec<Notification> = self
            .cache
            .snapshot()
            .into_iter()
            .filter(|n| !n.is_read)
            .collect();
        if unread.is_empty() {
            return Ok(());
        }

        let mut priors = Vec::with_capacity(unread.len());
        let mut ids = Vec::with_capacity(unread.len());
        for notification in unread {
            let id = notification.id.clone();
            let mut updated = notification;
            updated.is_read = true;
            priors.push((id.clone(), self.cache.upsert_speculative(&id, updated)));
            ids.push(Value::String(id));
        }

        let written = self
            .state
            .store()
            .update(
                tables::NOTIFICATIONS,
                &[RowFilter::any("id", ids)],
                json!({"is_read": true}),
            )
            .await;

        match written {
            Ok(_) => {
                for (id, _) in priors {
                    self.cache.confirm_local(&id);
                }
                Ok(())
            }
            Err(e) => {
                for (id, prior) in priors {
                    self.cache.restore(&id, prior);
                }
                tracing::warn!(error = %e, "mark_all_read failed, speculative reads rolled back");
                Err(e.into())
            }
        }
    }

    /// Delete a notification. The id is tombstoned locally so replayed
    /// feed events cannot resurface it.
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        self.mutator.delete(id).await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for NotificationsService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalSession;
    use crate::core::Config;
    use crate::remote::{MemoryStore, RemoteStore};
    use shared::util::now_millis;

    fn test_state(store: Arc<MemoryStore>) -> EngineState {
        let config = Config {
            confirm_timeout_ms: 100,
            feed_retry_delay_ms: 5,
            feed_max_retries: 3,
            ..Config::default()
        };
        EngineState::new(config, store, Arc::new(LocalSession::signed_in("u1")))
    }

    fn notification_row(id: &str, is_read: bool) -> Value {
        json!({
            "id": id,
            "merchant_id": "m1",
            "title": "Weekend offer",
            "message": "Free delivery on orders above 10,000 TZS",
            "type": "offer",
            "is_read": is_read,
            "created_at": now_millis(),
        })
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn started_service(store: Arc<MemoryStore>) -> NotificationsService {
        let state = test_state(store);
        let service = NotificationsService::start(&state, "m1").await.unwrap();
        wait_for(|| !service.handle().loading()).await;
        service
    }

    #[tokio::test]
    async fn unread_count_tracks_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            tables::NOTIFICATIONS,
            vec![
                notification_row("n1", false),
                notification_row("n2", false),
                notification_row("n3", true),
            ],
        );
        let service = started_service(store.clone()).await;
        assert_eq!(service.unread_count(), 2);

        service.mark_read("n1").await.unwrap();
        assert_eq!(service.unread_count(), 1);

        service.mark_all_read().await.unwrap();
        assert_eq!(service.unread_count(), 0);

        // Incoming admin notification bumps the count again.
        store
            .upsert(tables::NOTIFICATIONS, notification_row("n4", false), "id")
            .await
            .unwrap();
        wait_for(|| service.unread_count() == 1).await;
        assert_eq!(service.notifications().len(), 4);
    }

    #[tokio::test]
    async fn marking_read_twice_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::NOTIFICATIONS, vec![notification_row("n1", false)]);
        let service = started_service(store.clone()).await;

        service.mark_read("n1").await.unwrap();
        let writes = store.write_count();
        service.mark_read("n1").await.unwrap();
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn deleted_notification_does_not_resurface() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::NOTIFICATIONS, vec![notification_row("n1", false)]);
        let service = started_service(store.clone()).await;

        service.delete("n1").await.unwrap();
        assert_eq!(service.notifications().len(), 0);
        assert_eq!(store.row_count(tables::NOTIFICATIONS), 0);
        assert_eq!(service.unread_count(), 0);
    }

    #[tokio::test]
    async fn failed_delete_restores_the_notification() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::NOTIFICATIONS, vec![notification_row("n1", false)]);
        let service = started_service(store.clone()).await;

        store.fail_writes(true);
        assert!(service.delete("n1").await.is_err());
        assert_eq!(service.notifications().len(), 1);
        assert_eq!(service.unread_count(), 1);
    }
}
