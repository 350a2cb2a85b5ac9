//! CollectionStore - cached entity collections
//!
//! In-memory cache of one entity collection, keyed by identity. The
//! owning reconciler applies confirmed server state; optimistic mutators
//! write speculative entries that are later confirmed or restored.
//! Readers always get cloned snapshots, never a view into a partial
//! update.
//!
//! # Staleness guards
//!
//! Three guards make event application idempotent and replay-safe:
//! - a per-record revision: an event not newer than the cached record is
//!   a no-op;
//! - a collection watermark set by each bulk load: events at or below it
//!   are already reflected in the fetched rows;
//! - delete tombstones: a removed key cannot resurface through a replayed
//!   insert. An authoritative bulk load clears tombstones it contradicts.

use parking_lot::RwLock;
use shared::feed::ChangeOp;
use shared::models::Keyed;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, watch};

const EVENT_BUFFER: usize = 256;

/// One cached record with its sync metadata
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    pub record: T,
    /// Revision of the last confirmed server state for this record
    pub revision: u64,
    /// False while a speculative local mutation awaits confirmation
    pub confirmed: bool,
}

/// Result of applying one change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The cache changed
    Applied,
    /// Stale or duplicate event, cache untouched
    Stale,
}

/// Change notification emitted to projection consumers.
///
/// Only confirmed state is broadcast; speculative writes and rollbacks
/// bump the watch generation (so views re-render) but are invisible to
/// projections, which must never count unconfirmed state.
#[derive(Debug, Clone)]
pub enum StoreEvent<T> {
    /// A confirmed change to a single record (`record` is `None` for
    /// deletes)
    Applied {
        op: ChangeOp,
        key: String,
        record: Option<T>,
    },
    /// The whole collection was replaced by an authoritative bulk load
    Replaced,
}

#[derive(Debug)]
struct Inner<T> {
    records: HashMap<String, CachedEntry<T>>,
    tombstones: HashSet<String>,
    watermark: u64,
    generation: u64,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            tombstones: HashSet::new(),
            watermark: 0,
            generation: 0,
        }
    }
}

/// Cached collection of one entity type
#[derive(Debug)]
pub struct CollectionStore<T> {
    inner: RwLock<Inner<T>>,
    events_tx: broadcast::Sender<StoreEvent<T>>,
    generation_tx: watch::Sender<u64>,
}

impl<T> CollectionStore<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            events_tx,
            generation_tx,
        }
    }

    /// Cloned snapshot of every cached record (unsorted).
    pub fn snapshot(&self) -> Vec<T> {
        self.inner
            .read()
            .records
            .values()
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.read().records.get(key).map(|e| e.record.clone())
    }

    pub fn entry(&self, key: &str) -> Option<CachedEntry<T>> {
        self.inner.read().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Keys of entries awaiting confirmation.
    pub fn unconfirmed_keys(&self) -> Vec<String> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|(_, e)| !e.confirmed)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Generation counter bumped on every cache change.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Stream of confirmed changes, for incremental projections.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent<T>> {
        self.events_tx.subscribe()
    }

    /// Whether an event at `revision` for `key` would be a no-op.
    pub fn is_stale(&self, key: &str, revision: u64) -> bool {
        let inner = self.inner.read();
        if revision <= inner.watermark || inner.tombstones.contains(key) {
            return true;
        }
        match inner.records.get(key) {
            Some(entry) => revision <= entry.revision,
            None => false,
        }
    }

    /// Replace the whole collection with an authoritative fetch.
    ///
    /// Speculative entries are discarded in favor of the fetched state;
    /// the keys whose unconfirmed speculation did not survive are
    /// returned so the caller can surface "optimistic update reverted".
    pub fn bulk_replace(&self, records: Vec<T>, watermark: u64) -> Vec<String> {
        let mut reverted = Vec::new();
        {
            let mut inner = self.inner.write();
            let mut fresh: HashMap<String, CachedEntry<T>> = HashMap::with_capacity(records.len());
            for record in records {
                let key = record.key().to_string();
                fresh.insert(
                    key,
                    CachedEntry {
                        record,
                        revision: watermark,
                        confirmed: true,
                    },
                );
            }
            for (key, entry) in &inner.records {
                if entry.confirmed {
                    continue;
                }
                let survived = fresh
                    .get(key)
                    .map(|f| f.record == entry.record)
                    .unwrap_or(false);
                if !survived {
                    reverted.push(key.clone());
                }
            }
            // The fetch is ground truth: a row it returns is alive even if
            // we had tombstoned it.
            inner.tombstones.retain(|k| !fresh.contains_key(k));
            inner.records = fresh;
            inner.watermark = watermark;
            inner.generation += 1;
            let _ = self.generation_tx.send_replace(inner.generation);
        }
        let _ = self.events_tx.send(StoreEvent::Replaced);
        reverted
    }

    /// Apply a confirmed insert/update post-image. Stale and duplicate
    /// replays are no-ops; applying the same event twice leaves the
    /// snapshot unchanged.
    pub fn apply_confirmed(&self, key: &str, record: T, revision: u64, op: ChangeOp) -> ApplyOutcome {
        {
            let mut inner = self.inner.write();
            if revision <= inner.watermark || inner.tombstones.contains(key) {
                return ApplyOutcome::Stale;
            }
            if let Some(existing) = inner.records.get(key)
                && revision <= existing.revision
            {
                return ApplyOutcome::Stale;
            }
            inner.records.insert(
                key.to_string(),
                CachedEntry {
                    record: record.clone(),
                    revision,
                    confirmed: true,
                },
            );
            inner.generation += 1;
            let _ = self.generation_tx.send_replace(inner.generation);
        }
        let _ = self.events_tx.send(StoreEvent::Applied {
            op,
            key: key.to_string(),
            record: Some(record),
        });
        ApplyOutcome::Applied
    }

    /// Apply a confirmed delete. Removing an absent key is a no-op, but
    /// the tombstone is recorded either way so replayed inserts of the
    /// key stay dead.
    pub fn remove_confirmed(&self, key: &str, revision: u64) -> ApplyOutcome {
        let removed = {
            let mut inner = self.inner.write();
            if revision <= inner.watermark && !inner.records.contains_key(key) {
                return ApplyOutcome::Stale;
            }
            inner.tombstones.insert(key.to_string());
            let removed = inner.records.remove(key).is_some();
            if removed {
                inner.generation += 1;
                let _ = self.generation_tx.send_replace(inner.generation);
            }
            removed
        };
        if removed {
            let _ = self.events_tx.send(StoreEvent::Applied {
                op: ChangeOp::Delete,
                key: key.to_string(),
                record: None,
            });
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Stale
        }
    }

    /// Write a speculative record ahead of remote confirmation. Returns
    /// the prior entry for rollback (`None` if the key was absent).
    pub fn upsert_speculative(&self, key: &str, record: T) -> Option<CachedEntry<T>> {
        let mut inner = self.inner.write();
        let prior = inner.records.get(key).cloned();
        let revision = prior.as_ref().map(|e| e.revision).unwrap_or(inner.watermark);
        inner.records.insert(
            key.to_string(),
            CachedEntry {
                record,
                revision,
                confirmed: false,
            },
        );
        inner.generation += 1;
        let _ = self.generation_tx.send_replace(inner.generation);
        prior
    }

    /// Remove a record speculatively (optimistic delete). The key is
    /// tombstoned immediately; [`Self::restore`] undoes both.
    pub fn remove_speculative(&self, key: &str) -> Option<CachedEntry<T>> {
        let mut inner = self.inner.write();
        let prior = inner.records.remove(key);
        inner.tombstones.insert(key.to_string());
        inner.generation += 1;
        let _ = self.generation_tx.send_replace(inner.generation);
        prior
    }

    /// Roll a key back to its pre-mutation entry (or to absence).
    pub fn restore(&self, key: &str, prior: Option<CachedEntry<T>>) {
        let mut inner = self.inner.write();
        match prior {
            Some(entry) => {
                inner.tombstones.remove(key);
                inner.records.insert(key.to_string(), entry);
            }
            None => {
                inner.records.remove(key);
            }
        }
        inner.generation += 1;
        let _ = self.generation_tx.send_replace(inner.generation);
    }

    /// Mark a speculative entry confirmed without a feed event (the
    /// write's own success response is ground truth past the bounded
    /// wait). Emits the confirmed record to projection consumers.
    pub fn confirm_local(&self, key: &str) {
        let record = {
            let mut inner = self.inner.write();
            match inner.records.get_mut(key) {
                Some(entry) if !entry.confirmed => {
                    entry.confirmed = true;
                    let record = entry.record.clone();
                    inner.generation += 1;
                    let _ = self.generation_tx.send_replace(inner.generation);
                    Some(record)
                }
                _ => None,
            }
        };
        if let Some(record) = record {
            let _ = self.events_tx.send(StoreEvent::Applied {
                op: ChangeOp::Update,
                key: key.to_string(),
                record: Some(record),
            });
        }
    }
}

impl<T> Default for CollectionStore<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
