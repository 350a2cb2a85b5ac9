//! Merchant profile and per-merchant status singleton

use serde::{Deserialize, Serialize};

use super::Keyed;
use crate::util::now_millis;

/// Merchant profile (read-only from the engine's side)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Merchant {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Auth provider user id this merchant belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub merchant_id: String,
    pub merchant_name: String,
    pub merchant_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Per-merchant operational status. Exactly one row per merchant; keyed
/// by `merchant_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MerchantStatus {
    pub merchant_id: String,
    /// Whether the store is visible to customers
    pub is_visible: bool,
    /// Estimated preparation time in minutes, always positive
    pub prep_time: u32,
    pub auto_print_receipt: bool,
    pub order_chime_enabled: bool,
    /// UTC millis
    pub updated_at: i64,
}

impl MerchantStatus {
    /// Defaults applied when a merchant has no status row yet.
    pub fn default_for(merchant_id: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            is_visible: true,
            prep_time: 30,
            auto_print_receipt: false,
            order_chime_enabled: true,
            updated_at: now_millis(),
        }
    }
}

impl Keyed for MerchantStatus {
    fn key(&self) -> &str {
        &self.merchant_id
    }
}
