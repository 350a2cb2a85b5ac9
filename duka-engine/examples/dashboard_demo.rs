//! Demo: drive the sync engine against the in-memory store.
//!
//! Simulates an order arriving, the merchant accepting and completing
//! it, an admin notification, and a payout request.
//!
//! ```bash
//! cargo run -p duka-engine --example dashboard_demo
//! ```

use duka_engine::auth::LocalSession;
use duka_engine::services::{
    MerchantStatusService, NotificationsService, OrdersService, PayoutsService,
};
use duka_engine::{Config, EngineState, MemoryStore, RemoteStore};
use rust_decimal::dec;
use serde_json::json;
use shared::feed::tables;
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duka_engine::common::init_logger("info", false)?;

    let store = Arc::new(MemoryStore::new());
    store.seed(
        tables::MERCHANTS,
        vec![json!({
            "id": "row1",
            "user_id": "u1",
            "merchant_id": "m1",
            "merchant_name": "Mama Ntilie",
            "merchant_email": "mama@example.com",
        })],
    );

    let session = Arc::new(LocalSession::signed_in("u1"));
    let state = EngineState::new(Config::from_env(), store.clone(), session);
    state.spawn_session_guard();

    let merchant = duka_engine::services::fetch_merchant(&state).await?;
    tracing::info!(merchant = %merchant.merchant_name, "signed in");

    let orders = OrdersService::start(&state, &merchant.merchant_id).await?;
    let notifications = NotificationsService::start(&state, &merchant.merchant_id).await?;
    let status = MerchantStatusService::start(&state, &merchant.merchant_id).await?;
    tracing::info!(prep_time = status.current().prep_time, "status loaded");

    // A customer places an order (external process).
    store
        .upsert(
            tables::ORDERS,
            json!({
                "id": "o1",
                "order_id": "ORD-0001",
                "merchant_id": merchant.merchant_id,
                "customer_name": "Asha",
                "customer_phone": "+255700000001",
                "status": "pending",
                "total_amount": 12500.0,
                "created_at": now_millis(),
            }),
            "id",
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tracing::info!(pending = orders.status_buckets().pending, "order arrived");

    // Merchant works the pipeline.
    orders.accept("o1").await?;
    orders.complete("o1").await?;
    tracing::info!(
        revenue_today = %orders.revenue_today(),
        ready = orders.status_buckets().ready,
        "order ready for pickup"
    );

    // Admin pushes a notification.
    store
        .upsert(
            tables::NOTIFICATIONS,
            json!({
                "id": "n1",
                "merchant_id": merchant.merchant_id,
                "title": "Weekend offer",
                "message": "Free delivery on orders above 10,000 TZS",
                "type": "offer",
                "is_read": false,
                "created_at": now_millis(),
            }),
            "id",
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tracing::info!(unread = notifications.unread_count(), "notification received");
    notifications.mark_all_read().await?;

    // Merchant requests a payout.
    let payouts = PayoutsService::new(&state, &merchant.merchant_id, &merchant.merchant_name);
    let request = payouts.submit(dec!(10000), "+255700000001").await?;
    tracing::info!(request_id = %request.id, "payout requested");

    orders.shutdown();
    notifications.shutdown();
    status.shutdown();
    Ok(())
}
