//! Orders service
//!
//! Live view of the merchant's orders plus the two merchant-originated
//! pipeline transitions (accept, complete) and the revenue/status
//! projections. Line items live in their own table; the loader joins
//! them onto the aggregates at bulk load, and the decoder grafts or
//! hydrates them when single-row events arrive.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use shared::feed::{ChangeEvent, tables};
use shared::models::{Order, OrderItem, OrderItemRow, OrderStatus};
use shared::util::now_millis;

use super::CollectionHandle;
use crate::common::{EngineError, EngineResult};
use crate::core::EngineState;
use crate::projections::{OrderStatusBuckets, RevenueToday, order_status_buckets};
use crate::remote::{OrderBy, RemoteStore, RowFilter};
use crate::sync::{
    BulkLoader, ChangeFeedClient, CollectionStore, HandleStatus, Mutation, MutationOutcome,
    OptimisticMutator, Reconciler, RecordDecoder, StoreEvent, WriteOp,
};

/// Joins `orders` rows with their `order_items` rows.
struct OrdersLoader {
    merchant_id: String,
}

#[async_trait]
impl BulkLoader<Order> for OrdersLoader {
    async fn load(&self, store: &dyn RemoteStore) -> EngineResult<Vec<Order>> {
        let filters = vec![RowFilter::eq("merchant_id", self.merchant_id.as_str())];
        let rows = store
            .fetch_all(
                tables::ORDERS,
                &filters,
                Some(OrderBy::desc("created_at")),
                None,
            )
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(serde_json::from_value::<Order>(row)?);
        }
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Value> = orders.iter().map(|o| Value::String(o.id.clone())).collect();
        let item_rows = store
            .fetch_all(
                tables::ORDER_ITEMS,
                &[RowFilter::any("order_id", ids)],
                None,
                None,
            )
            .await?;

        let mut by_order: HashMap<String, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let item: OrderItemRow = serde_json::from_value(row)?;
            by_order
                .entry(item.order_id.clone())
                .or_default()
                .push(item.into());
        }
        for order in &mut orders {
            if let Some(items) = by_order.remove(&order.id) {
                order.items = items;
            }
        }
        Ok(orders)
    }
}

/// Decodes an `orders` row into the aggregate. The row does not carry
/// line items: updates keep the cached items, fresh inserts hydrate them
/// with a targeted fetch.
struct OrderRowDecoder {
    store: Arc<dyn RemoteStore>,
}

#[async_trait]
impl RecordDecoder<Order> for OrderRowDecoder {
    async fn decode(
        &self,
        event: &ChangeEvent,
        existing: Option<&Order>,
    ) -> EngineResult<Option<Order>> {
        let Some(row) = &event.after else {
            return Ok(None);
        };
        let mut order: Order = serde_json::from_value(row.clone())?;
        if order.items.is_empty() {
            match existing {
                Some(prev) => order.items = prev.items.clone(),
                None => {
                    let rows = self
                        .store
                        .fetch_all(
                            tables::ORDER_ITEMS,
                            &[RowFilter::eq("order_id", order.id.as_str())],
                            None,
                            None,
                        )
                        .await?;
                    for row in rows {
                        let item: OrderItemRow = serde_json::from_value(row)?;
                        order.items.push(item.into());
                    }
                }
            }
        }
        Ok(Some(order))
    }
}

fn sort_newest_first(orders: &mut Vec<Order>) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Live orders view for one merchant
pub struct OrdersService {
    cache: Arc<CollectionStore<Order>>,
    mutator: OptimisticMutator<Order>,
    revenue: Arc<Mutex<RevenueToday>>,
    status: HandleStatus,
    cancel: CancellationToken,
}

impl OrdersService {
    /// Subscribe, bulk load and start the reconciler for `merchant_id`.
    pub async fn start(state: &EngineState, merchant_id: &str) -> EngineResult<Self> {
        let store = state.store();
        let cache = Arc::new(CollectionStore::new());
        let status = HandleStatus::new_loading();
        let cancel = state.scope_token();
        let filters = vec![RowFilter::eq("merchant_id", merchant_id)];

        // Subscribe before the bulk load so nothing slips between them;
        // the load's watermark drops anything the fetch already covered.
        let feed = ChangeFeedClient::open(
            store.clone(),
            tables::ORDERS,
            filters,
            vec![],
            Duration::from_millis(state.config.feed_retry_delay_ms),
            state.config.feed_max_retries,
        )
        .await?;

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            cache.clone(),
            tables::ORDERS,
            Arc::new(OrdersLoader {
                merchant_id: merchant_id.to_string(),
            }),
            Arc::new(OrderRowDecoder {
                store: store.clone(),
            }),
        ));

        let revenue = Arc::new(Mutex::new(RevenueToday::new()));
        spawn_revenue_task(cache.clone(), revenue.clone(), cancel.clone());

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
            tables::ORDERS,
            "id",
            Duration::from_millis(state.config.confirm_timeout_ms),
        );

        Ok(Self {
            cache,
            mutator,
            revenue,
            status,
            cancel,
        })
    }

    /// `{items, loading, error}` view for the presentation layer.
    pub fn handle(&self) -> CollectionHandle<Order> {
        CollectionHandle::new(self.cache.clone(), self.status.clone(), sort_newest_first)
    }

    /// Current orders, newest first.
    pub fn orders(&self) -> Vec<Order> {
        self.handle().items()
    }

    /// Merchant accepts a pending order.
    pub async fn accept(&self, id: &str) -> EngineResult<MutationOutcome<Order>> {
        self.transition(id, OrderStatus::Preparing).await
    }

    /// Merchant finishes preparing an order.
    pub async fn complete(&self, id: &str) -> EngineResult<MutationOutcome<Order>> {
        self.transition(id, OrderStatus::Ready).await
    }

    async fn transition(
        &self,
        id: &str,
        next: OrderStatus,
    ) -> EngineResult<MutationOutcome<Order>> {
        self.mutator
            .mutate(id, move |order| {
                if !order.status.can_transition(next) {
                    return Err(EngineError::Validation(format!(
                        "illegal status transition {:?} -> {next:?}",
                        order.status
                    )));
                }
                let now = now_millis();
                let mut updated = order.clone();
                updated.status = next;
                updated.updated_at = Some(now);
                Ok(Mutation {
                    write: WriteOp::Patch(json!({"status": next, "updated_at": now})),
                    record: updated,
                })
            })
            .await
    }

    /// Revenue from today's ready/delivered orders.
    pub fn revenue_today(&self) -> Decimal {
        let mut revenue = self.revenue.lock();
        if revenue.is_stale() {
            revenue.prime(&self.cache.snapshot());
        }
        revenue.total()
    }

    /// Order counts per status for the current snapshot.
    pub fn status_buckets(&self) -> OrderStatusBuckets {
        order_status_buckets(&self.cache.snapshot())
    }

    /// Release the subscription and stop applying events.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for OrdersService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feeds confirmed order changes into the revenue projection. Rebuilds
/// from the snapshot on bulk replaces, lag, or day rollover.
fn spawn_revenue_task(
    cache: Arc<CollectionStore<Order>>,
    revenue: Arc<Mutex<RevenueToday>>,
    cancel: CancellationToken,
) {
    let mut events = cache.events();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(StoreEvent::Applied {
                    record: Some(order),
                    ..
                }) => {
                    let mut revenue = revenue.lock();
                    if revenue.is_stale() {
                        revenue.prime(&cache.snapshot());
                    } else {
                        revenue.observe(&order);
                    }
                }
                Ok(StoreEvent::Applied { .. }) => {}
                Ok(StoreEvent::Replaced) => {
                    revenue.lock().prime(&cache.snapshot());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "revenue projection lagged, rebuilding from snapshot");
                    revenue.lock().prime(&cache.snapshot());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalSession;
    use crate::core::Config;
    use crate::remote::MemoryStore;
    use rust_decimal::dec;

    fn test_state(store: Arc<MemoryStore>) -> EngineState {
        let config = Config {
            confirm_timeout_ms: 100,
            feed_retry_delay_ms: 5,
            feed_max_retries: 3,
            ..Config::default()
        };
        EngineState::new(config, store, Arc::new(LocalSession::signed_in("u1")))
    }

    fn order_row(id: &str, status: &str, amount: f64, created_at: i64) -> Value {
        json!({
            "id": id,
            "order_id": format!("ORD-{id}"),
            "merchant_id": "m1",
            "customer_name": "Asha",
            "customer_phone": "+255700000001",
            "status": status,
            "total_amount": amount,
            "created_at": created_at,
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

    #[tokio::test]
    async fn bulk_load_joins_line_items() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::ORDERS, vec![order_row("o1", "pending", 5000.0, now_millis())]);
        store.seed(
            tables::ORDER_ITEMS,
            vec![json!({
                "id": "it1",
                "order_id": "o1",
                "product_id": "p1",
                "product_name": "Chips Mayai",
                "quantity": 2,
            })],
        );
        let state = test_state(store);

        let service = OrdersService::start(&state, "m1").await.unwrap();
        wait_for(|| !service.handle().loading()).await;

        let orders = service.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].items.len(), 1);
        assert_eq!(orders[0].items[0].product_name, "Chips Mayai");
    }

    #[tokio::test]
    async fn accept_rejects_illegal_transitions() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::ORDERS, vec![order_row("o1", "ready", 5000.0, now_millis())]);
        let state = test_state(store.clone());

        let service = OrdersService::start(&state, "m1").await.unwrap();
        wait_for(|| !service.handle().loading()).await;

        let writes_before = store.write_count();
        let err = service.accept("o1").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        // Rejected locally: no remote call, no cache change.
        assert_eq!(store.write_count(), writes_before);
        assert_eq!(service.orders()[0].status, OrderStatus::Ready);
    }

    #[tokio::test]
    async fn update_event_preserves_cached_line_items() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::ORDERS, vec![order_row("o1", "pending", 5000.0, now_millis())]);
        store.seed(
            tables::ORDER_ITEMS,
            vec![json!({
                "id": "it1",
                "order_id": "o1",
                "product_id": "p1",
                "product_name": "Chips Mayai",
                "quantity": 2,
            })],
        );
        let state = test_state(store.clone());
        let service = OrdersService::start(&state, "m1").await.unwrap();
        wait_for(|| !service.handle().loading()).await;

        store
            .update(
                tables::ORDERS,
                &[RowFilter::eq("id", "o1")],
                json!({"status": "preparing"}),
            )
            .await
            .unwrap();
        wait_for(|| service.orders()[0].status == OrderStatus::Preparing).await;
        assert_eq!(service.orders()[0].items.len(), 1);
    }

    #[tokio::test]
    async fn revenue_counts_ready_orders_created_today() {
        let store = Arc::new(MemoryStore::new());
        store.seed(tables::ORDERS, vec![order_row("o1", "pending", 5000.0, now_millis())]);
        let state = test_state(store.clone());
        let service = OrdersService::start(&state, "m1").await.unwrap();
        wait_for(|| !service.handle().loading()).await;
        assert_eq!(service.revenue_today(), Decimal::ZERO);

        store
            .update(
                tables::ORDERS,
                &[RowFilter::eq("id", "o1")],
                json!({"status": "ready"}),
            )
            .await
            .unwrap();
        wait_for(|| service.revenue_today() == dec!(5000)).await;

        let buckets = service.status_buckets();
        assert_eq!(buckets.pending, 0);
        assert_eq!(buckets.ready, 1);
    }
}
