//! Best-effort admin tracking writes
//!
//! Deliberate non-blocking side channel: activity, performance and
//! payment log inserts are spawned as fire-and-forget tasks. A failure
//! is logged under the `tracking` target and never reaches the caller's
//! result.

use serde_json::{Value, json};
use std::sync::Arc;

use shared::util::snowflake_id;

use crate::remote::RemoteStore;

/// Spawn a fire-and-forget insert into an admin tracking table.
pub fn track(store: Arc<dyn RemoteStore>, table: &'static str, mut record: Value) {
    if record.get("id").is_none()
        && let Value::Object(map) = &mut record
    {
        map.insert("id".to_string(), json!(format!("log_{}", snowflake_id())));
    }
    tokio::spawn(async move {
        if let Err(e) = store.upsert(table, record, "id").await {
            tracing::warn!(target: "tracking", table, error = %e, "tracking write failed");
        }
    });
}
