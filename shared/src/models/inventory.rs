//! Inventory item model and stock status derivation

use serde::{Deserialize, Serialize};

use super::Keyed;

/// Stock health bucket, derived from the current/maximum ratio
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    Good,
    Warning,
    Danger,
}

impl StockStatus {
    /// Derive the bucket from stock levels.
    ///
    /// `Danger` at a ratio of 25% or below, `Warning` at 50% or below,
    /// `Good` above that. Integer arithmetic keeps the boundary cases
    /// exact (e.g. 25/100 is Danger, 26/100 is Warning).
    ///
    /// This is recomputed on every stock write; a status field arriving
    /// from outside is never trusted.
    pub fn derive(current_stock: u32, maximum_stock: u32) -> Self {
        debug_assert!(maximum_stock > 0);
        let current = current_stock as u64;
        let maximum = maximum_stock as u64;
        if current * 4 <= maximum {
            Self::Danger
        } else if current * 2 <= maximum {
            Self::Warning
        } else {
            Self::Good
        }
    }
}

/// Tracked stock for one product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub id: String,
    pub merchant_id: String,
    pub product_id: String,
    pub product_name: String,
    pub current_stock: u32,
    pub minimum_stock: u32,
    /// Always positive
    pub maximum_stock: u32,
    pub status: StockStatus,
    /// UTC millis
    pub last_updated: i64,
}

impl Keyed for InventoryItem {
    fn key(&self) -> &str {
        &self.id
    }
}
