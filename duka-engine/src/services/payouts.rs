//! Payouts service
//!
//! Submit M-Pesa withdrawal requests and read their statuses back. The
//! merchant only creates `pending` rows; approval, rejection and
//! completion belong to an external admin process and are observed
//! through reads. Submissions are validated locally before any remote
//! call, and every accepted submission emits a best-effort payment-log
//! entry.

use rust_decimal::Decimal;
use serde_json::json;
use validator::{Validate, ValidationError};

use shared::feed::tables;
use shared::models::{PaymentRequest, PayoutStatus};
use shared::util::{now_millis, snowflake_id};

use super::tracking;
use crate::common::{EngineError, EngineResult};
use crate::core::EngineState;
use crate::remote::{OrderBy, RowFilter};

/// Validated payout submission input
#[derive(Debug, Validate)]
struct PayoutSubmission {
    #[validate(custom(function = validate_amount))]
    amount: Decimal,
    #[validate(custom(function = validate_mpesa_phone))]
    mpesa_phone: String,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    Ok(())
}

/// M-Pesa phone: optional leading `+`, then 9-15 digits.
fn validate_mpesa_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.is_empty()
        || !digits.chars().all(|c| c.is_ascii_digit())
        || !(9..=15).contains(&digits.len())
    {
        return Err(ValidationError::new("invalid_mpesa_phone"));
    }
    Ok(())
}

/// Payout submission and read-back for one merchant
pub struct PayoutsService {
    state: EngineState,
    merchant_id: String,
    merchant_name: String,
}

impl PayoutsService {
    pub fn new(state: &EngineState, merchant_id: &str, merchant_name: &str) -> Self {
        Self {
            state: state.clone(),
            merchant_id: merchant_id.to_string(),
            merchant_name: merchant_name.to_string(),
        }
    }

    /// Submit a withdrawal request. Returns the created request.
    pub async fn submit(&self, amount: Decimal, mpesa_phone: &str) -> EngineResult<PaymentRequest> {
        let submission = PayoutSubmission {
            amount,
            mpesa_phone: mpesa_phone.to_string(),
        };
        if let Err(errors) = submission.validate() {
            return Err(EngineError::Validation(validation_message(&errors)));
        }

        let request = PaymentRequest {
            id: format!("pay_{}", snowflake_id()),
            merchant_id: self.merchant_id.clone(),
            merchant_name: self.merchant_name.clone(),
            amount,
            status: PayoutStatus::Pending,
            mpesa_phone: mpesa_phone.to_string(),
            request_date: now_millis(),
            approved_date: None,
            completion_date: None,
            admin_notes: None,
        };

        self.state
            .store()
            .upsert(
                tables::PAYMENT_REQUESTS,
                serde_json::to_value(&request)?,
                "id",
            )
            .await?;

        tracking::track(
            self.state.store(),
            tables::PAYMENT_LOGS,
            json!({
                "merchant_id": self.merchant_id,
                "action": "WITHDRAWAL_REQUESTED",
                "amount": request.amount,
                "details": format!("M-Pesa withdrawal to {}", request.mpesa_phone),
                "timestamp": now_millis(),
            }),
        );

        Ok(request)
    }

    /// The merchant's requests, newest first.
    pub async fn requests(&self) -> EngineResult<Vec<PaymentRequest>> {
        let rows = self
            .state
            .store()
            .fetch_all(
                tables::PAYMENT_REQUESTS,
                &[RowFilter::eq("merchant_id", self.merchant_id.as_str())],
                Some(OrderBy::desc("request_date")),
                None,
            )
            .await?;
        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            requests.push(serde_json::from_value::<PaymentRequest>(row)?);
        }
        Ok(requests)
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let codes: Vec<&str> = errs.iter().map(|e| e.code.as_ref()).collect();
            format!("{field}: {}", codes.join(", "))
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalSession;
    use crate::core::Config;
    use crate::remote::MemoryStore;
    use rust_decimal::dec;
    use std::sync::Arc;

    fn service(store: Arc<MemoryStore>) -> PayoutsService {
        let state = EngineState::new(
            Config::default(),
            store,
            Arc::new(LocalSession::signed_in("u1")),
        );
        PayoutsService::new(&state, "m1", "Mama Ntilie")
    }

    #[test]
    fn phone_validation_accepts_common_forms() {
        assert!(validate_mpesa_phone("+255700000001").is_ok());
        assert!(validate_mpesa_phone("0700000001").is_ok());
        assert!(validate_mpesa_phone("").is_err());
        assert!(validate_mpesa_phone("+2557abc").is_err());
        assert!(validate_mpesa_phone("12345678").is_err());
        assert!(validate_mpesa_phone("+1234567890123456").is_err());
    }

    #[tokio::test]
    async fn invalid_submissions_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let payouts = service(store.clone());

        let err = payouts.submit(dec!(0), "+255700000001").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = payouts.submit(dec!(5000), "not-a-phone").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn submitted_request_is_pending_and_readable() {
        let store = Arc::new(MemoryStore::new());
        let payouts = service(store.clone());

        let created = payouts.submit(dec!(25000), "+255700000001").await.unwrap();
        assert_eq!(created.status, PayoutStatus::Pending);

        let listed = payouts.requests().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].amount, dec!(25000));
    }
}
