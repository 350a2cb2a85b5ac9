//! In-memory store backend
//!
//! Process-local [`RemoteStore`] implementation backing tests and demos.
//! Rows live in per-table maps; every committed write bumps the table's
//! revision counter and fans the change event out to matching
//! subscribers (best-effort: a slow subscriber's full channel drops the
//! event, which the engine tolerates by resync).
//!
//! Fault injection knobs simulate the failure modes the engine must
//! handle: rejected writes, writes acknowledged but lost server-side,
//! and dropped subscriptions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use shared::feed::{ChangeEvent, ChangeOp};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::store::{FeedSubscription, OrderBy, RemoteStore, RowFilter, StoreError};

const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<String, Value>,
    revision: u64,
}

#[derive(Debug)]
struct Subscriber {
    table: String,
    filters: Vec<RowFilter>,
    ops: Vec<ChangeOp>,
    tx: mpsc::Sender<ChangeEvent>,
}

impl Subscriber {
    fn wants(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        if !self.ops.is_empty() && !self.ops.contains(&event.op) {
            return false;
        }
        // Filter against whichever image exists (post for insert/update,
        // pre for delete).
        let image = event.after.as_ref().or(event.before.as_ref());
        match image {
            Some(row) => self.filters.iter().all(|f| f.matches(row)),
            None => false,
        }
    }
}

/// In-memory [`RemoteStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, TableState>>,
    subscribers: Mutex<Vec<Subscriber>>,
    write_count: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    swallow_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows without emitting change events (pre-subscription state).
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables.lock();
        let state = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(key) = row_key(&row, "id") {
                state.revision += 1;
                state.rows.insert(key, row);
            }
        }
    }

    /// Number of write calls issued (successful, rejected or swallowed).
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// When set, every write call fails with a connection error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// When set, every fetch fails with a timeout.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(30_000));
        }
        Ok(())
    }

    /// When set, writes are acknowledged but not applied and no event is
    /// emitted — the "lost write" failure mode.
    pub fn swallow_writes(&self, swallow: bool) {
        self.swallow_writes.store(swallow, Ordering::SeqCst);
    }

    /// Drop every live subscription, simulating a connection loss.
    /// Subscribers observe end-of-stream and must resubscribe.
    pub fn disconnect_feeds(&self) {
        self.subscribers.lock().clear();
    }

    /// Direct row count, for test assertions.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn check_write(&self) -> Result<bool, StoreError> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected write failure".into()));
        }
        // true = apply, false = acknowledge without applying
        Ok(!self.swallow_writes.load(Ordering::SeqCst))
    }

    fn publish(&self, event: ChangeEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|sub| {
            if !sub.wants(&event) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(table = %event.table, "subscriber buffer full, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_all(
        &self,
        table: &str,
        filters: &[RowFilter],
        order: Option<OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_read()?;
        let tables = self.tables.lock();
        let mut rows: Vec<Value> = match tables.get(table) {
            Some(state) => state
                .rows
                .values()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        drop(tables);

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let cmp = cmp_values(a.get(&order.field), b.get(&order.field));
                if order.ascending { cmp } else { cmp.reverse() }
            });
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Value, StoreError> {
        if !self.check_write()? {
            return Ok(record);
        }
        let key = row_key(&record, conflict_key).ok_or_else(|| {
            StoreError::Backend(format!("upsert record missing key field '{conflict_key}'"))
        })?;

        let (event, stored) = {
            let mut tables = self.tables.lock();
            let state = tables.entry(table.to_string()).or_default();
            state.revision += 1;
            let revision = state.revision;
            match state.rows.get(&key).cloned() {
                Some(before) => {
                    let merged = merge_rows(before.clone(), &record);
                    state.rows.insert(key.clone(), merged.clone());
                    (
                        ChangeEvent::update(table, &key, revision, Some(before), merged.clone()),
                        merged,
                    )
                }
                None => {
                    state.rows.insert(key.clone(), record.clone());
                    (
                        ChangeEvent::insert(table, &key, revision, record.clone()),
                        record,
                    )
                }
            }
        };
        self.publish(event);
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[RowFilter],
        patch: Value,
    ) -> Result<u64, StoreError> {
        if !self.check_write()? {
            return Ok(0);
        }
        let events = {
            let mut tables = self.tables.lock();
            let Some(state) = tables.get_mut(table) else {
                return Ok(0);
            };
            let keys: Vec<String> = state
                .rows
                .iter()
                .filter(|(_, row)| filters.iter().all(|f| f.matches(row)))
                .map(|(k, _)| k.clone())
                .collect();

            let mut events = Vec::with_capacity(keys.len());
            for key in keys {
                let before = state.rows[&key].clone();
                let after = merge_rows(before.clone(), &patch);
                state.revision += 1;
                state.rows.insert(key.clone(), after.clone());
                events.push(ChangeEvent::update(
                    table,
                    &key,
                    state.revision,
                    Some(before),
                    after,
                ));
            }
            events
        };
        let count = events.len() as u64;
        for event in events {
            self.publish(event);
        }
        Ok(count)
    }

    async fn delete(&self, table: &str, filters: &[RowFilter]) -> Result<u64, StoreError> {
        if !self.check_write()? {
            return Ok(0);
        }
        let events = {
            let mut tables = self.tables.lock();
            let Some(state) = tables.get_mut(table) else {
                return Ok(0);
            };
            let keys: Vec<String> = state
                .rows
                .iter()
                .filter(|(_, row)| filters.iter().all(|f| f.matches(row)))
                .map(|(k, _)| k.clone())
                .collect();

            let mut events = Vec::with_capacity(keys.len());
            for key in keys {
                let before = state.rows.remove(&key);
                state.revision += 1;
                events.push(ChangeEvent::delete(table, &key, state.revision, before));
            }
            events
        };
        let count = events.len() as u64;
        for event in events {
            self.publish(event);
        }
        Ok(count)
    }

    async fn revision(&self, table: &str) -> Result<u64, StoreError> {
        self.check_read()?;
        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|t| t.revision)
            .unwrap_or(0))
    }

    async fn subscribe(
        &self,
        table: &str,
        filters: &[RowFilter],
        ops: &[ChangeOp],
    ) -> Result<FeedSubscription, StoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().push(Subscriber {
            table: table.to_string(),
            filters: filters.to_vec(),
            ops: ops.to_vec(),
            tx,
        });
        Ok(FeedSubscription::new(rx))
    }
}

/// Primary key of a row as a string.
fn row_key(row: &Value, key_field: &str) -> Option<String> {
    match row.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Total order over optional JSON values, for `order_by` sorting.
/// Missing fields sort first; numbers compare numerically, strings
/// lexicographically, everything else by serialized form.
fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

/// Merge the fields of `patch` over `base` (object-level, not deep).
fn merge_rows(base: Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
            Value::Object(base)
        }
        (_, patch) => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::feed::tables;

    #[tokio::test]
    async fn upsert_is_idempotent_on_conflict_key() {
        let store = MemoryStore::new();
        let row = json!({"merchant_id": "m1", "is_visible": true});
        store
            .upsert(tables::MERCHANT_STATUS, row.clone(), "merchant_id")
            .await
            .unwrap();
        store
            .upsert(tables::MERCHANT_STATUS, row, "merchant_id")
            .await
            .unwrap();
        assert_eq!(store.row_count(tables::MERCHANT_STATUS), 1);
    }

    #[tokio::test]
    async fn update_patches_matching_rows_and_bumps_revision() {
        let store = MemoryStore::new();
        store.seed(
            tables::ORDERS,
            vec![json!({"id": "o1", "merchant_id": "m1", "status": "pending"})],
        );
        let rev_before = store.revision(tables::ORDERS).await.unwrap();

        let count = store
            .update(
                tables::ORDERS,
                &[RowFilter::eq("id", "o1")],
                json!({"status": "preparing"}),
            )
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.revision(tables::ORDERS).await.unwrap() > rev_before);

        let rows = store
            .fetch_all(tables::ORDERS, &[], None, None)
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "preparing");
    }

    #[tokio::test]
    async fn subscribers_only_see_matching_rows() {
        let store = MemoryStore::new();
        let mut feed = store
            .subscribe(
                tables::ORDERS,
                &[RowFilter::eq("merchant_id", "m1")],
                &[],
            )
            .await
            .unwrap();

        store
            .upsert(
                tables::ORDERS,
                json!({"id": "a", "merchant_id": "m2"}),
                "id",
            )
            .await
            .unwrap();
        store
            .upsert(
                tables::ORDERS,
                json!({"id": "b", "merchant_id": "m1"}),
                "id",
            )
            .await
            .unwrap();

        let event = feed.next().await.unwrap();
        assert_eq!(event.key, "b");
    }

    #[tokio::test]
    async fn disconnect_ends_subscriptions() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe(tables::ORDERS, &[], &[]).await.unwrap();
        store.disconnect_feeds();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_writes_leave_rows_untouched() {
        let store = MemoryStore::new();
        store.seed(tables::ORDERS, vec![json!({"id": "o1", "status": "pending"})]);
        store.fail_writes(true);
        let err = store
            .update(
                tables::ORDERS,
                &[RowFilter::eq("id", "o1")],
                json!({"status": "preparing"}),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
        let rows = store
            .fetch_all(tables::ORDERS, &[], None, None)
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], "pending");
    }
}
