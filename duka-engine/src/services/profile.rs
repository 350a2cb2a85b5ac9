//! Merchant profile lookup
//!
//! Read-only: the profile row keyed by the signed-in auth user.

use shared::feed::tables;
use shared::models::Merchant;

use crate::common::{EngineError, EngineResult};
use crate::core::EngineState;
use crate::remote::RowFilter;

/// Fetch the merchant profile for the current session user.
pub async fn fetch_merchant(state: &EngineState) -> EngineResult<Merchant> {
    let user_id = state
        .session()
        .current_user()
        .ok_or_else(|| EngineError::NotFound("no signed-in user".into()))?;

    let rows = state
        .store()
        .fetch_all(
            tables::MERCHANTS,
            &[RowFilter::eq("user_id", user_id.as_str())],
            None,
            Some(1),
        )
        .await?;

    match rows.into_iter().next() {
        Some(row) => Ok(serde_json::from_value(row)?),
        None => Err(EngineError::NotFound(format!(
            "no merchant profile for user {user_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalSession;
    use crate::core::Config;
    use crate::remote::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolves_the_profile_for_the_session_user() {
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
        let state = EngineState::new(
            Config::default(),
            store,
            Arc::new(LocalSession::signed_in("u1")),
        );

        let merchant = fetch_merchant(&state).await.unwrap();
        assert_eq!(merchant.merchant_id, "m1");
        assert_eq!(merchant.merchant_name, "Mama Ntilie");
    }

    #[tokio::test]
    async fn missing_profile_and_missing_session_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let state = EngineState::new(
            Config::default(),
            store.clone(),
            Arc::new(LocalSession::signed_in("u1")),
        );
        assert!(matches!(
            fetch_merchant(&state).await.unwrap_err(),
            EngineError::NotFound(_)
        ));

        let signed_out = EngineState::new(
            Config::default(),
            store,
            Arc::new(LocalSession::signed_out()),
        );
        assert!(matches!(
            fetch_merchant(&signed_out).await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }
}
