//! OptimisticMutator - speculative local mutations
//!
//! Applies a merchant action to the cache immediately, issues the remote
//! write, and reconciles the speculation against the eventual confirmed
//! state:
//!
//! ```text
//! mutate(key, transform)
//!     ├─ 1. acquire per-key lock (queues concurrent mutations)
//!     ├─ 2. transform current record → speculative record + write op
//!     ├─ 3. write speculative entry into the cache (unconfirmed)
//!     ├─ 4. issue the remote write
//!     ├─ 5a. failure → restore prior entry, surface the error
//!     └─ 5b. success → wait (bounded) for a confirming feed event;
//!             past the bound, the success response is ground truth
//! ```
//!
//! Exactly one mutation per key is in flight at any time: a second call
//! for the same key parks on the lock and re-reads the post-confirmation
//! record when it runs, so no update is lost and no two conflicting
//! writes race.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use shared::models::Keyed;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::collection::CollectionStore;
use crate::common::{EngineError, EngineResult};
use crate::remote::{RemoteStore, RowFilter};

/// Remote write issued for a mutation
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Patch the row matching the entity key
    Patch(Value),
    /// Upsert the full record on a conflict key (the race-safe path for
    /// singleton rows)
    Upsert { conflict_key: String },
}

/// A computed mutation: the speculative record plus its remote write
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub record: T,
    pub write: WriteOp,
}

/// How a successful mutation was ultimately confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// A matching change event confirmed the speculative state
    Feed,
    /// No event arrived within the bound; the write's success response
    /// was taken as ground truth
    Response,
    /// Authoritative state disagreed with the speculation; the cache
    /// now holds the server's version
    Reverted,
}

/// Outcome of a successful mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome<T> {
    /// The record as the cache holds it after confirmation
    pub record: T,
    pub confirmation: Confirmation,
}

/// Applies speculative mutations to one entity collection
pub struct OptimisticMutator<T> {
    store: Arc<dyn RemoteStore>,
    cache: Arc<CollectionStore<T>>,
    table: String,
    key_field: String,
    confirm_timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<T> OptimisticMutator<T>
where
    T: Keyed + Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<CollectionStore<T>>,
        table: &str,
        key_field: &str,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            table: table.to_string(),
            key_field: key_field.to_string(),
            confirm_timeout,
            locks: DashMap::new(),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Mutate the record for `key`. `transform` runs against the record
    /// as cached when this mutation is dequeued, so queued callers see
    /// the result of the mutation ahead of them.
    pub async fn mutate<F>(&self, key: &str, transform: F) -> EngineResult<MutationOutcome<T>>
    where
        F: FnOnce(&T) -> EngineResult<Mutation<T>> + Send,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let current = self
            .cache
            .get(key)
            .ok_or_else(|| EngineError::NotFound(format!("{}: {key}", self.table)))?;

        // Validation failures surface synchronously, before any remote
        // call or cache write.
        let Mutation { record, write } = transform(&current)?;

        let prior = self.cache.upsert_speculative(key, record.clone());

        let written = match write {
            WriteOp::Patch(patch) => self
                .store
                .update(
                    &self.table,
                    &[RowFilter::eq(self.key_field.as_str(), key)],
                    patch,
                )
                .await
                .map(|_| ()),
            WriteOp::Upsert { conflict_key } => match serde_json::to_value(&record) {
                Ok(row) => self
                    .store
                    .upsert(&self.table, row, &conflict_key)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e.into()),
            },
        };

        if let Err(e) = written {
            self.cache.restore(key, prior);
            tracing::warn!(
                table = %self.table,
                key,
                error = %e,
                "remote write failed, optimistic mutation rolled back"
            );
            return Err(e.into());
        }

        Ok(self.await_confirmation(key, record).await)
    }

    /// Delete the record for `key` optimistically: removed from the
    /// cache at once, restored if the remote delete fails.
    pub async fn delete(&self, key: &str) -> EngineResult<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // Checked before the speculative removal so an absent key is not
        // tombstoned, which would suppress a later legitimate insert.
        if self.cache.get(key).is_none() {
            return Err(EngineError::NotFound(format!("{}: {key}", self.table)));
        }
        let prior = self.cache.remove_speculative(key);

        match self
            .store
            .delete(
                &self.table,
                &[RowFilter::eq(self.key_field.as_str(), key)],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                self.cache.restore(key, prior);
                tracing::warn!(
                    table = %self.table,
                    key,
                    error = %e,
                    "remote delete failed, record restored"
                );
                Err(e.into())
            }
        }
    }

    async fn await_confirmation(&self, key: &str, speculative: T) -> MutationOutcome<T> {
        let mut generation = self.cache.watch();
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            match self.cache.entry(key) {
                Some(entry) if entry.confirmed => {
                    let confirmation = if entry.record == speculative {
                        Confirmation::Feed
                    } else {
                        tracing::warn!(
                            table = %self.table,
                            key,
                            "optimistic update reverted by confirmed state"
                        );
                        Confirmation::Reverted
                    };
                    return MutationOutcome {
                        record: entry.record,
                        confirmation,
                    };
                }
                // Entry vanished: an authoritative fetch dropped it.
                None => {
                    tracing::warn!(
                        table = %self.table,
                        key,
                        "optimistic update discarded by authoritative fetch"
                    );
                    return MutationOutcome {
                        record: speculative,
                        confirmation: Confirmation::Reverted,
                    };
                }
                Some(_) => {}
            }

            match tokio::time::timeout_at(deadline, generation.changed()).await {
                Ok(Ok(())) => continue,
                // Watch closed or deadline passed: fall back to the
                // write's own success response.
                Ok(Err(_)) | Err(_) => {
                    self.cache.confirm_local(key);
                    let record = self.cache.get(key).unwrap_or(speculative);
                    return MutationOutcome {
                        record,
                        confirmation: Confirmation::Response,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;
    use shared::feed::ChangeOp;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        value: i64,
    }

    impl Keyed for Row {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn setup(value: i64) -> (Arc<MemoryStore>, Arc<CollectionStore<Row>>, OptimisticMutator<Row>) {
        let store = Arc::new(MemoryStore::new());
        store.seed("rows", vec![json!({"id": "a", "value": value})]);
        let cache = Arc::new(CollectionStore::new());
        cache.apply_confirmed(
            "a",
            Row {
                id: "a".into(),
                value,
            },
            1,
            ChangeOp::Insert,
        );
        let mutator = OptimisticMutator::new(
            store.clone(),
            cache.clone(),
            "rows",
            "id",
            Duration::from_millis(50),
        );
        (store, cache, mutator)
    }

    fn bump(row: &Row) -> EngineResult<Mutation<Row>> {
        let mut next = row.clone();
        next.value += 1;
        Ok(Mutation {
            write: WriteOp::Patch(json!({"value": next.value})),
            record: next,
        })
    }

    #[tokio::test]
    async fn failed_write_restores_the_exact_prior_snapshot() {
        let (store, cache, mutator) = setup(1);
        let before = cache.snapshot();

        store.fail_writes(true);
        let err = mutator.mutate("a", bump).await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
        assert_eq!(cache.snapshot(), before);
        assert!(cache.entry("a").unwrap().confirmed);
    }

    #[tokio::test]
    async fn success_without_feed_event_confirms_from_response() {
        let (store, cache, mutator) = setup(1);
        // Writes are acknowledged but no event comes back.
        store.swallow_writes(true);

        let outcome = mutator.mutate("a", bump).await.unwrap();
        assert_eq!(outcome.confirmation, Confirmation::Response);
        assert_eq!(outcome.record.value, 2);
        assert!(cache.entry("a").unwrap().confirmed);
    }

    #[tokio::test]
    async fn second_mutation_queues_behind_the_first() {
        let (store, cache, mutator) = setup(1);
        let mutator = Arc::new(mutator);

        let (a, b) = tokio::join!(
            mutator.mutate("a", bump),
            mutator.mutate("a", bump),
        );
        a.unwrap();
        b.unwrap();

        // Each mutation saw the other's result: both bumps landed.
        assert_eq!(cache.get("a").unwrap().value, 3);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn validation_failure_issues_no_remote_write() {
        let (store, cache, mutator) = setup(1);
        let before = cache.snapshot();

        let err = mutator
            .mutate("a", |_row| {
                Err::<Mutation<Row>, _>(EngineError::Validation("nope".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.write_count(), 0);
        assert_eq!(cache.snapshot(), before);
    }

    #[tokio::test]
    async fn deleting_an_absent_key_leaves_no_tombstone() {
        use super::super::collection::ApplyOutcome;

        let (_store, cache, mutator) = setup(1);
        let err = mutator.delete("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        // A later confirmed insert of that key still applies.
        let row = Row {
            id: "ghost".into(),
            value: 7,
        };
        assert_eq!(
            cache.apply_confirmed("ghost", row, 9, ChangeOp::Insert),
            ApplyOutcome::Applied
        );
    }

    #[tokio::test]
    async fn delete_rolls_back_when_remote_delete_fails() {
        let (store, cache, mutator) = setup(1);
        store.fail_writes(true);

        let err = mutator.delete("a").await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
        assert_eq!(cache.get("a").unwrap().value, 1);
    }
}
