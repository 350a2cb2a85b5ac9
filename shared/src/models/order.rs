//! Order model and status state machine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Keyed;

/// Order fulfillment status
///
/// The pipeline is strictly forward: `Pending → Preparing → Ready →
/// Delivered`, with `Cancelled` reachable from any non-terminal state.
/// The engine itself only originates the first two transitions (merchant
/// accept and merchant complete); dispatch confirmation and cancellation
/// arrive from outside via the change feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Position along the fulfillment pipeline. `Cancelled` has no rank.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Preparing => Some(1),
            Self::Ready => Some(2),
            Self::Delivered => Some(3),
            Self::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether a locally-originated transition to `next` is legal.
    ///
    /// Only single forward steps are allowed; cancellation is legal from
    /// any non-terminal state. Backward moves and skips are rejected.
    pub fn can_transition(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// Statuses that contribute to the revenue projection.
    pub fn counts_toward_revenue(self) -> bool {
        matches!(self, Self::Ready | Self::Delivered)
    }
}

/// Line item embedded in an [`Order`] aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    /// Always positive
    pub quantity: u32,
}

/// Raw `order_items` row (carries the owning order id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRow {
    pub order_id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
        }
    }
}

/// Order aggregate
///
/// `id` is the stable server-assigned key; `order_id` is the human-facing
/// display id printed on receipts. Items come from the `order_items`
/// table and are grafted onto the aggregate at load time, so a bare
/// `orders` row deserializes with an empty item list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub order_id: String,
    pub merchant_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    pub status: OrderStatus,
    /// Total in currency units (TZS)
    #[serde(default)]
    pub total_amount: Decimal,
    /// UTC millis
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl Keyed for Order {
    fn key(&self) -> &str {
        &self.id
    }
}
