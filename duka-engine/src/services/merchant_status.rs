//! Merchant status service
//!
//! The status singleton: visibility, preparation time, auto-print and
//! chime flags. Exactly one row per merchant — a missing row is created
//! through an idempotent upsert keyed by merchant id, so concurrent
//! first loads cannot race into duplicates. Visibility flips emit a
//! best-effort activity-log entry for admin tracking.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use shared::feed::tables;
use shared::models::MerchantStatus;
use shared::util::now_millis;

use super::tracking;
use crate::common::{EngineError, EngineResult};
use crate::core::EngineState;
use crate::remote::RowFilter;
use crate::sync::{
    ChangeFeedClient, CollectionStore, HandleStatus, JsonLoader, JsonRowDecoder, Mutation,
    MutationOutcome, OptimisticMutator, Reconciler, WriteOp,
};

/// Per-merchant status singleton view
pub struct MerchantStatusService {
    state: EngineState,
    merchant_id: String,
    cache: Arc<CollectionStore<MerchantStatus>>,
    mutator: OptimisticMutator<MerchantStatus>,
    status: HandleStatus,
    cancel: CancellationToken,
}

impl MerchantStatusService {
    pub async fn start(state: &EngineState, merchant_id: &str) -> EngineResult<Self> {
        let store = state.store();
        let cache = Arc::new(CollectionStore::new());
        let status = HandleStatus::new_loading();
        let cancel = state.scope_token();
        let filters = vec![RowFilter::eq("merchant_id", merchant_id)];

        let feed = ChangeFeedClient::open(
            store.clone(),
            tables::MERCHANT_STATUS,
            filters.clone(),
            vec![],
            Duration::from_millis(state.config.feed_retry_delay_ms),
            state.config.feed_max_retries,
        )
        .await?;

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            cache.clone(),
            tables::MERCHANT_STATUS,
            Arc::new(JsonLoader {
                table: tables::MERCHANT_STATUS.to_string(),
                filters,
                order: None,
                limit: None,
            }),
            Arc::new(JsonRowDecoder),
        ));

        // Load here (not in the spawned loop) so the missing-row default
        // can be created before the service is handed out.
        match reconciler.load().await {
            Ok(_) => status.clear_error(),
            Err(e) => {
                tracing::error!(error = %e, "initial merchant status load failed");
                status.set_error(e.to_string());
            }
        }
        if cache.is_empty() && status.error().is_none() {
            let default = MerchantStatus::default_for(merchant_id);
            // Idempotent: concurrent callers converge on one row instead
            // of racing a check-then-insert.
            store
                .upsert(
                    tables::MERCHANT_STATUS,
                    serde_json::to_value(&default)?,
                    "merchant_id",
                )
                .await?;
            reconciler.load().await?;
        }
        status.finish_loading();

        {
            let reconciler = reconciler.clone();
            let cancel = cancel.clone();
            let status = status.clone();
            tokio::spawn(async move {
                reconciler.consume(feed, cancel, status).await;
            });
        }

        let mutator = OptimisticMutator::new(
            store,
            cache.clone(),
            tables::MERCHANT_STATUS,
            "merchant_id",
            Duration::from_millis(state.config.confirm_timeout_ms),
        );

        Ok(Self {
            state: state.clone(),
            merchant_id: merchant_id.to_string(),
            cache,
            mutator,
            status,
            cancel,
        })
    }

    /// Current status; defaults until the first load lands.
    pub fn current(&self) -> MerchantStatus {
        self.cache
            .get(&self.merchant_id)
            .unwrap_or_else(|| MerchantStatus::default_for(&self.merchant_id))
    }

    pub fn loading(&self) -> bool {
        self.status.loading()
    }

    pub fn error(&self) -> Option<String> {
        self.status.error()
    }

    /// Toggle store visibility. Emits a best-effort activity-log entry.
    pub async fn set_visibility(&self, visible: bool) -> EngineResult<MutationOutcome<MerchantStatus>> {
        let outcome = self
            .apply(move |current| {
                current.is_visible = visible;
            })
            .await?;

        tracking::track(
            self.state.store(),
            tables::MERCHANT_ACTIVITY_LOG,
            json!({
                "merchant_id": self.merchant_id,
                "action": if visible { "STORE_ONLINE" } else { "STORE_OFFLINE" },
                "details": if visible { "Store went online" } else { "Store went offline" },
                "timestamp": now_millis(),
            }),
        );
        Ok(outcome)
    }

    pub async fn toggle_visibility(&self) -> EngineResult<MutationOutcome<MerchantStatus>> {
        let visible = !self.current().is_visible;
        self.set_visibility(visible).await
    }

    /// Set the estimated preparation time in minutes (must be positive).
    pub async fn set_prep_time(&self, minutes: u32) -> EngineResult<MutationOutcome<MerchantStatus>> {
        if minutes == 0 {
            return Err(EngineError::Validation(
                "preparation time must be positive".into(),
            ));
        }
        self.apply(move |current| {
            current.prep_time = minutes;
        })
        .await
    }

    pub async fn set_auto_print(&self, enabled: bool) -> EngineResult<MutationOutcome<MerchantStatus>> {
        self.apply(move |current| {
            current.auto_print_receipt = enabled;
        })
        .await
    }

    pub async fn set_chime(&self, enabled: bool) -> EngineResult<MutationOutcome<MerchantStatus>> {
        self.apply(move |current| {
            current.order_chime_enabled = enabled;
        })
        .await
    }

    /// Optimistic upsert of the full status row, keyed by merchant id.
    async fn apply<F>(&self, change: F) -> EngineResult<MutationOutcome<MerchantStatus>>
    where
        F: FnOnce(&mut MerchantStatus) + Send,
    {
        self.mutator
            .mutate(&self.merchant_id, move |current| {
                let mut updated = current.clone();
                change(&mut updated);
                updated.updated_at = now_millis();
                Ok(Mutation {
                    record: updated,
                    write: WriteOp::Upsert {
                        conflict_key: "merchant_id".to_string(),
                    },
                })
            })
            .await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MerchantStatusService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
