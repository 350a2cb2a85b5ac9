//! Payout (payment request) model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Keyed;

/// Lifecycle of a payout request. The merchant only ever creates rows in
/// `Pending`; every later transition is made by an external admin process
/// and observed through reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Completed,
}

/// Merchant withdrawal request paid out via M-Pesa
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRequest {
    pub id: String,
    pub merchant_id: String,
    pub merchant_name: String,
    /// Requested amount in currency units (TZS)
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub mpesa_phone: String,
    /// UTC millis
    pub request_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
}

impl Keyed for PaymentRequest {
    fn key(&self) -> &str {
        &self.id
    }
}
