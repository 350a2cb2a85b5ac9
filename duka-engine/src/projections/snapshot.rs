//! On-read snapshot projections
//!
//! Small-cardinality aggregates recomputed from the current snapshot on
//! every read. Keeping these pure functions of the cache means they can
//! never desync from it the way independently maintained counters can.

use shared::models::{InventoryItem, Notification, Order, OrderStatus, StockStatus};

/// Count of cached notifications still unread.
///
/// Always equals `|{n : !n.is_read}|` for the snapshot it was computed
/// from; there is no separate counter to fall out of step.
pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.is_read).count()
}

/// Orders per fulfillment status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderStatusBuckets {
    pub pending: usize,
    pub preparing: usize,
    pub ready: usize,
    pub delivered: usize,
    pub cancelled: usize,
}

pub fn order_status_buckets(orders: &[Order]) -> OrderStatusBuckets {
    let mut buckets = OrderStatusBuckets::default();
    for order in orders {
        match order.status {
            OrderStatus::Pending => buckets.pending += 1,
            OrderStatus::Preparing => buckets.preparing += 1,
            OrderStatus::Ready => buckets.ready += 1,
            OrderStatus::Delivered => buckets.delivered += 1,
            OrderStatus::Cancelled => buckets.cancelled += 1,
        }
    }
    buckets
}

/// Inventory items per stock-health bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventoryBuckets {
    pub good: usize,
    pub warning: usize,
    pub danger: usize,
}

/// Bucket counts for the current inventory snapshot. The ratio is
/// re-derived from the stock numbers; a stale `status` field in the row
/// is ignored.
pub fn inventory_buckets(items: &[InventoryItem]) -> InventoryBuckets {
    let mut buckets = InventoryBuckets::default();
    for item in items {
        match StockStatus::derive(item.current_stock, item.maximum_stock) {
            StockStatus::Good => buckets.good += 1,
            StockStatus::Warning => buckets.warning += 1,
            StockStatus::Danger => buckets.danger += 1,
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::NotificationKind;
    use shared::util::now_millis;

    fn notification(id: &str, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            merchant_id: "m1".to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
            kind: NotificationKind::Message,
            is_read,
            created_at: now_millis(),
            admin_id: None,
        }
    }

    #[test]
    fn unread_count_matches_the_snapshot_exactly() {
        let all = vec![
            notification("a", false),
            notification("b", true),
            notification("c", false),
        ];
        assert_eq!(unread_count(&all), 2);
        assert_eq!(unread_count(&[]), 0);
    }

    #[test]
    fn inventory_buckets_rederive_status_from_stock() {
        let mut item = InventoryItem {
            id: "i1".to_string(),
            merchant_id: "m1".to_string(),
            product_id: "p1".to_string(),
            product_name: "Rice".to_string(),
            current_stock: 10,
            minimum_stock: 10,
            maximum_stock: 100,
            // Lies about its own health; the projection must not trust it.
            status: StockStatus::Good,
            last_updated: now_millis(),
        };
        let buckets = inventory_buckets(std::slice::from_ref(&item));
        assert_eq!(buckets.danger, 1);
        assert_eq!(buckets.good, 0);

        item.current_stock = 80;
        let buckets = inventory_buckets(std::slice::from_ref(&item));
        assert_eq!(buckets.good, 1);
    }
}
