//! Change-feed wire types
//!
//! These types travel between a store backend and the sync engine. A
//! backend emits one [`ChangeEvent`] per committed row change on a
//! subscribed table; the engine applies them to its local caches.
//!
//! # Revisions
//!
//! Every event carries a per-table monotonic `revision` stamped by the
//! store boundary at commit time. Post-images alone cannot distinguish a
//! stale replay from a legitimate rapid re-update, so the engine compares
//! revisions instead: an event whose revision is not newer than the
//! cached record's is a no-op. Replaying a feed is therefore always safe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Table names consumed by the engine.
pub mod tables {
    pub const ORDERS: &str = "orders";
    pub const ORDER_ITEMS: &str = "order_items";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MERCHANT_STATUS: &str = "merchant_status";
    pub const MERCHANT_INVENTORY: &str = "merchant_inventory";
    pub const PAYMENT_REQUESTS: &str = "payment_requests";
    pub const MERCHANTS: &str = "merchants";

    // Best-effort admin tracking tables (fire-and-forget writes only)
    pub const MERCHANT_ACTIVITY_LOG: &str = "merchant_activity_log";
    pub const MERCHANT_PERFORMANCE_LOG: &str = "merchant_performance_log";
    pub const PAYMENT_LOGS: &str = "payment_logs";
}

/// Row-level change operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single row change on a subscribed table.
///
/// `after` is the post-image (absent for deletes), `before` the pre-image
/// when the backend can provide one. Delivery is at-least-once; consumers
/// must treat application as idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Source table
    pub table: String,
    /// Operation kind
    pub op: ChangeOp,
    /// Primary key of the affected row
    pub key: String,
    /// Per-table monotonic revision stamped at commit
    pub revision: u64,
    /// Pre-image (updates/deletes, when available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Post-image (inserts/updates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// Insert event with a post-image
    pub fn insert(table: &str, key: &str, revision: u64, after: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Insert,
            key: key.to_string(),
            revision,
            before: None,
            after: Some(after),
        }
    }

    /// Update event with pre- and post-image
    pub fn update(
        table: &str,
        key: &str,
        revision: u64,
        before: Option<serde_json::Value>,
        after: serde_json::Value,
    ) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Update,
            key: key.to_string(),
            revision,
            before,
            after: Some(after),
        }
    }

    /// Delete event, pre-image when available
    pub fn delete(table: &str, key: &str, revision: u64, before: Option<serde_json::Value>) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Delete,
            key: key.to_string(),
            revision,
            before,
            after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = ChangeEvent::update(
            tables::ORDERS,
            "o1",
            7,
            None,
            serde_json::json!({"id": "o1", "status": "ready"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op, ChangeOp::Update);
        assert_eq!(back.key, "o1");
        assert_eq!(back.revision, 7);
        assert!(back.before.is_none());
    }
}
