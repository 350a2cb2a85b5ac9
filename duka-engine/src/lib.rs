//! Duka sync engine
//!
//! Client-side real-time state synchronization for the merchant
//! dashboard. Each entity collection is bulk-loaded from the remote
//! store, kept current by a change-feed subscription, and mutated
//! optimistically ahead of server confirmation.
//!
//! # Architecture
//!
//! ```text
//! RemoteStore (capability trait)
//!      │ fetch_all / upsert / update / delete / subscribe
//!      ▼
//! ChangeFeedClient ──► Reconciler ──► CollectionStore<T> ──► snapshots
//!                            ▲               │
//!                            │               └──► projections (revenue,
//!                  OptimisticMutator              unread, buckets)
//!                            ▲
//!                            │ accept / complete / mark_read / ...
//!                       services (presentation facade)
//! ```
//!
//! Reads are always cloned snapshots; a collection is written only by
//! its reconciler and the mutators acting for it. View teardown happens
//! through a `CancellationToken` so late feed callbacks are discarded
//! rather than applied.

pub mod auth;
pub mod common;
pub mod core;
pub mod projections;
pub mod remote;
pub mod services;
pub mod sync;

// Re-export commonly used items
pub use common::{EngineError, EngineResult};
pub use core::{Config, EngineState};
pub use remote::{MemoryStore, RemoteStore};
