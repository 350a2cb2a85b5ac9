//! Inventory service
//!
//! Stock levels per product. Inventory has no change feed — the
//! collection is small and merchant-edited, so it is fetched on start
//! (and on demand via [`InventoryService::refresh`]) and mutated
//! optimistically. The stock-status bucket is re-derived on every write;
//! whatever status the caller passes in is ignored. Every saved change
//! emits a best-effort performance-log entry for admin monitoring.

use serde_json::json;
use std::sync::Arc;

use shared::feed::tables;
use shared::models::{InventoryItem, StockStatus};
use shared::util::{now_millis, snowflake_id};

use super::{CollectionHandle, tracking};
use crate::common::{EngineError, EngineResult};
use crate::core::EngineState;
use crate::projections::{InventoryBuckets, inventory_buckets};
use crate::remote::{OrderBy, RowFilter};
use crate::sync::{CollectionStore, HandleStatus};

fn sort_by_name(items: &mut Vec<InventoryItem>) {
    items.sort_by(|a, b| a.product_name.cmp(&b.product_name));
}

/// Inventory view for one merchant
pub struct InventoryService {
    state: EngineState,
    merchant_id: String,
    cache: Arc<CollectionStore<InventoryItem>>,
    status: HandleStatus,
}

impl InventoryService {
    pub async fn start(state: &EngineState, merchant_id: &str) -> EngineResult<Self> {
        let service = Self {
            state: state.clone(),
            merchant_id: merchant_id.to_string(),
            cache: Arc::new(CollectionStore::new()),
            status: HandleStatus::new_loading(),
        };
        if let Err(e) = service.refresh().await {
            tracing::error!(error = %e, "initial inventory load failed");
            service.status.set_error(e.to_string());
        }
        service.status.finish_loading();
        Ok(service)
    }

    /// Re-fetch the collection. A failure keeps the previous snapshot
    /// visible and sets the error indicator.
    pub async fn refresh(&self) -> EngineResult<()> {
        let store = self.state.store();
        let watermark = store.revision(tables::MERCHANT_INVENTORY).await?;
        let rows = store
            .fetch_all(
                tables::MERCHANT_INVENTORY,
                &[RowFilter::eq("merchant_id", self.merchant_id.as_str())],
                Some(OrderBy::asc("product_name")),
                None,
            )
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(serde_json::from_value::<InventoryItem>(row)?);
        }
        self.cache.bulk_replace(items, watermark);
        self.status.clear_error();
        Ok(())
    }

    pub fn handle(&self) -> CollectionHandle<InventoryItem> {
        CollectionHandle::new(self.cache.clone(), self.status.clone(), sort_by_name)
    }

    /// Current items, sorted by product name.
    pub fn items(&self) -> Vec<InventoryItem> {
        self.handle().items()
    }

    /// Stock-health bucket counts for the current snapshot.
    pub fn buckets(&self) -> InventoryBuckets {
        inventory_buckets(&self.cache.snapshot())
    }

    /// Save an item: validates stock bounds, re-derives the status
    /// bucket, writes optimistically, and rolls back if the remote
    /// upsert fails.
    pub async fn save_item(&self, mut item: InventoryItem) -> EngineResult<InventoryItem> {
        if item.maximum_stock == 0 {
            return Err(EngineError::Validation("maximum stock must be positive".into()));
        }
        if item.current_stock > item.maximum_stock {
            return Err(EngineError::Validation(format!(
                "current stock {} exceeds maximum {}",
                item.current_stock, item.maximum_stock
            )));
        }

        // Never trust the incoming status field.
        item.status = StockStatus::derive(item.current_stock, item.maximum_stock);
        item.last_updated = now_millis();
        item.merchant_id = self.merchant_id.clone();

        let key = item.id.clone();
        let prior = self.cache.upsert_speculative(&key, item.clone());
        let written = self
            .state
            .store()
            .upsert(
                tables::MERCHANT_INVENTORY,
                serde_json::to_value(&item)?,
                "id",
            )
            .await;

        match written {
            Ok(_) => {
                // No feed for inventory: the success response is the
                // confirmation.
                self.cache.confirm_local(&key);
                tracking::track(
                    self.state.store(),
                    tables::MERCHANT_PERFORMANCE_LOG,
                    json!({
                        "merchant_id": self.merchant_id,
                        "event_type": "inventory_update",
                        "event_details": format!("{} - Status: {:?}", item.product_name, item.status),
                        "timestamp": now_millis(),
                    }),
                );
                Ok(item)
            }
            Err(e) => {
                self.cache.restore(&key, prior);
                tracing::warn!(key, error = %e, "inventory save failed, rolled back");
                Err(e.into())
            }
        }
    }

    /// Create a new tracked product with the standard starting levels.
    pub async fn create_item(&self, product_name: &str) -> EngineResult<InventoryItem> {
        if product_name.trim().is_empty() {
            return Err(EngineError::Validation("product name is required".into()));
        }
        let item = InventoryItem {
            id: format!("inv_{}", snowflake_id()),
            merchant_id: self.merchant_id.clone(),
            product_id: format!("PROD{}", snowflake_id()),
            product_name: product_name.trim().to_string(),
            current_stock: 0,
            minimum_stock: 10,
            maximum_stock: 100,
            status: StockStatus::Danger,
            last_updated: now_millis(),
        };
        self.save_item(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalSession;
    use crate::core::Config;
    use crate::remote::MemoryStore;
    use std::time::Duration;

    fn test_state(store: Arc<MemoryStore>) -> EngineState {
        EngineState::new(
            Config::default(),
            store,
            Arc::new(LocalSession::signed_in("u1")),
        )
    }

    fn item(id: &str, current: u32, maximum: u32) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            merchant_id: "m1".to_string(),
            product_id: format!("PROD-{id}"),
            product_name: format!("Product {id}"),
            current_stock: current,
            minimum_stock: 10,
            maximum_stock: maximum,
            status: StockStatus::Good,
            last_updated: now_millis(),
        }
    }

    #[tokio::test]
    async fn save_rederives_the_status_bucket() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        let service = InventoryService::start(&state, "m1").await.unwrap();

        // Claims Good, but 10/100 is Danger.
        let saved = service.save_item(item("i1", 10, 100)).await.unwrap();
        assert_eq!(saved.status, StockStatus::Danger);
        assert_eq!(service.buckets().danger, 1);

        let saved = service.save_item(item("i1", 40, 100)).await.unwrap();
        assert_eq!(saved.status, StockStatus::Warning);

        // Performance log insert lands eventually (best-effort).
        for _ in 0..200 {
            if store.row_count(tables::MERCHANT_PERFORMANCE_LOG) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.row_count(tables::MERCHANT_PERFORMANCE_LOG), 2);
    }

    #[tokio::test]
    async fn invalid_stock_bounds_are_rejected_locally() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        let service = InventoryService::start(&state, "m1").await.unwrap();

        let writes = store.write_count();
        assert!(service.save_item(item("i1", 5, 0)).await.is_err());
        assert!(service.save_item(item("i1", 200, 100)).await.is_err());
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn failed_save_rolls_back_the_cache() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        let service = InventoryService::start(&state, "m1").await.unwrap();
        service.save_item(item("i1", 80, 100)).await.unwrap();

        store.fail_writes(true);
        assert!(service.save_item(item("i1", 10, 100)).await.is_err());
        assert_eq!(service.items()[0].current_stock, 80);
    }

    #[tokio::test]
    async fn create_item_starts_with_standard_levels() {
        let store = Arc::new(MemoryStore::new());
        let state = test_state(store.clone());
        let service = InventoryService::start(&state, "m1").await.unwrap();

        let created = service.create_item("Maize flour").await.unwrap();
        assert_eq!(created.current_stock, 0);
        assert_eq!(created.minimum_stock, 10);
        assert_eq!(created.maximum_stock, 100);
        assert_eq!(created.status, StockStatus::Danger);
        assert!(service.create_item("  ").await.is_err());
    }

}
