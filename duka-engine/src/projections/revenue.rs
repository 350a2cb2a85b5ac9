//! Today's revenue projection
//!
//! Sum of `total_amount` over orders that reached `ready` or `delivered`
//! and were created within the local calendar day. Primed from a bulk
//! snapshot, then adjusted incrementally from the confirmed change
//! stream.
//!
//! An order contributes at most once: the first event that shows it in a
//! counting status inserts its id into `counted` and adds its amount.
//! Replayed or reordered duplicates hit the set and do nothing. Revenue
//! is immutable once counted — a later cancellation does not decrement —
//! and the projection is rebuilt from the snapshot when the local day
//! rolls over.

use chrono::{DateTime, Local, NaiveDate};
use rust_decimal::Decimal;
use shared::models::Order;
use std::collections::HashSet;

fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

/// Local calendar date an UTC-millis timestamp falls on.
fn local_date(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.with_timezone(&Local).date_naive())
}

/// Incremental revenue-for-today aggregate
#[derive(Debug)]
pub struct RevenueToday {
    /// Local day the totals refer to
    day: NaiveDate,
    /// Order ids already counted; guarantees at-most-once contribution
    counted: HashSet<String>,
    total: Decimal,
}

impl RevenueToday {
    pub fn new() -> Self {
        Self {
            day: today_local(),
            counted: HashSet::new(),
            total: Decimal::ZERO,
        }
    }

    /// Whether the tracked day is no longer the current local day.
    pub fn is_stale(&self) -> bool {
        self.day != today_local()
    }

    /// Rebuild from a full snapshot (initial load, resync, day rollover).
    pub fn prime(&mut self, orders: &[Order]) {
        self.day = today_local();
        self.counted.clear();
        self.total = Decimal::ZERO;
        for order in orders {
            self.observe(order);
        }
    }

    /// Account for one confirmed order state. Safe to call with the same
    /// state any number of times.
    pub fn observe(&mut self, order: &Order) {
        if !order.status.counts_toward_revenue() {
            return;
        }
        if local_date(order.created_at) != Some(self.day) {
            return;
        }
        if self.counted.insert(order.id.clone()) {
            self.total += order.total_amount;
        }
    }

    pub fn total(&self) -> Decimal {
        self.total
    }
}

impl Default for RevenueToday {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;
    use shared::models::OrderStatus;
    use shared::util::now_millis;

    fn order(id: &str, status: OrderStatus, amount: Decimal, created_at: i64) -> Order {
        Order {
            id: id.to_string(),
            order_id: format!("ORD-{id}"),
            merchant_id: "m1".to_string(),
            customer_name: String::new(),
            customer_phone: String::new(),
            status,
            total_amount: amount,
            created_at,
            updated_at: None,
            items: vec![],
        }
    }

    #[test]
    fn counts_an_order_at_most_once_under_replay() {
        let mut projection = RevenueToday::new();
        let ready = order("o1", OrderStatus::Ready, dec!(5000), now_millis());

        projection.observe(&ready);
        projection.observe(&ready);
        projection.observe(&order("o1", OrderStatus::Delivered, dec!(5000), now_millis()));
        assert_eq!(projection.total(), dec!(5000));
    }

    #[test]
    fn pending_orders_do_not_count() {
        let mut projection = RevenueToday::new();
        projection.observe(&order("o1", OrderStatus::Pending, dec!(900), now_millis()));
        projection.observe(&order("o2", OrderStatus::Preparing, dec!(900), now_millis()));
        assert_eq!(projection.total(), Decimal::ZERO);
    }

    #[test]
    fn orders_created_on_another_day_do_not_count() {
        let mut projection = RevenueToday::new();
        let two_days_ago = now_millis() - 48 * 3600 * 1000;
        projection.observe(&order("o1", OrderStatus::Ready, dec!(700), two_days_ago));
        assert_eq!(projection.total(), Decimal::ZERO);
    }

    #[test]
    fn cancellation_after_counting_does_not_decrement() {
        let mut projection = RevenueToday::new();
        let created = now_millis();
        projection.observe(&order("o1", OrderStatus::Ready, dec!(1200), created));
        projection.observe(&order("o1", OrderStatus::Cancelled, dec!(1200), created));
        assert_eq!(projection.total(), dec!(1200));
    }

    #[test]
    fn prime_resets_previous_state() {
        let mut projection = RevenueToday::new();
        projection.observe(&order("o1", OrderStatus::Ready, dec!(1000), now_millis()));

        projection.prime(&[order("o2", OrderStatus::Delivered, dec!(300), now_millis())]);
        assert_eq!(projection.total(), dec!(300));

        // o1 can count again after a rebuild that did not include it.
        projection.observe(&order("o1", OrderStatus::Ready, dec!(1000), now_millis()));
        assert_eq!(projection.total(), dec!(1300));
    }
}
