//! RemoteStore capability trait
//!
//! CRUD plus change-feed subscription over one logical table, rows as
//! JSON values. The engine types rows at its own boundary; backends stay
//! schema-agnostic. All calls return an outcome, never panic.

use async_trait::async_trait;
use serde_json::Value;
use shared::feed::{ChangeEvent, ChangeOp};
use std::fmt;
use tokio::sync::mpsc;

/// Store-level error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection lost or unreachable (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Call exceeded its deadline (retryable)
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// Write rejected because of concurrent server-side state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row or table not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Row predicate, evaluated against JSON rows
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field is one of the values
    In { field: String, values: Vec<Value> },
}

impl RowFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn any(field: &str, values: Vec<Value>) -> Self {
        Self::In {
            field: field.to_string(),
            values,
        }
    }

    /// Whether a row satisfies this predicate. A missing field never
    /// matches.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Self::Eq { field, value } => row.get(field) == Some(value),
            Self::In { field, values } => match row.get(field) {
                Some(v) => values.contains(v),
                None => false,
            },
        }
    }
}

/// Sort directive for `fetch_all`
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            ascending: true,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            ascending: false,
        }
    }
}

/// A live change-feed subscription.
///
/// Yields events in receipt order while the connection is live; `None`
/// means the subscription dropped (or was closed) and events may have
/// been missed — the consumer must resubscribe and re-fetch. Dropping
/// the subscription releases it.
#[derive(Debug)]
pub struct FeedSubscription {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl FeedSubscription {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Remote persistent store capability.
///
/// Guarantees assumed by the engine: `subscribe` delivers at-least-once
/// for rows matching the filter while live, ordered per table within one
/// live connection; no ordering survives a reconnect. Every event is
/// stamped with a per-table monotonic revision.
#[async_trait]
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// Fetch all rows matching `filters`, optionally sorted and capped.
    async fn fetch_all(
        &self,
        table: &str,
        filters: &[RowFilter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert or replace a row, keyed by `conflict_key`. Idempotent:
    /// concurrent callers with the same key converge on one row.
    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Value, StoreError>;

    /// Merge `patch` into every row matching `filters`; returns the
    /// affected row count.
    async fn update(
        &self,
        table: &str,
        filters: &[RowFilter],
        patch: Value,
    ) -> Result<u64, StoreError>;

    /// Delete every row matching `filters`; returns the affected count.
    async fn delete(&self, table: &str, filters: &[RowFilter]) -> Result<u64, StoreError>;

    /// Current revision high-water mark for a table. A bulk fetch
    /// paired with this value defines an authoritative cut: any event
    /// at or below it is already reflected in the fetched rows.
    async fn revision(&self, table: &str) -> Result<u64, StoreError>;

    /// Open a change-feed over rows matching `filters`. `ops` empty
    /// means all operations.
    async fn subscribe(
        &self,
        table: &str,
        filters: &[RowFilter],
        ops: &[ChangeOp],
    ) -> Result<FeedSubscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_filter_matches_exact_field() {
        let f = RowFilter::eq("merchant_id", "m1");
        assert!(f.matches(&json!({"merchant_id": "m1", "x": 1})));
        assert!(!f.matches(&json!({"merchant_id": "m2"})));
        assert!(!f.matches(&json!({"other": "m1"})));
    }

    #[test]
    fn in_filter_matches_any_listed_value() {
        let f = RowFilter::any("id", vec![json!("a"), json!("b")]);
        assert!(f.matches(&json!({"id": "a"})));
        assert!(f.matches(&json!({"id": "b"})));
        assert!(!f.matches(&json!({"id": "c"})));
    }
}
