//! Real-time synchronization core
//!
//! One [`CollectionStore`] per entity type holds the locally cached
//! collection; a [`Reconciler`] keeps it consistent with the remote
//! store by bulk load plus idempotent change-event application; an
//! [`OptimisticMutator`] applies merchant actions speculatively ahead of
//! confirmation. [`ChangeFeedClient`] wraps the raw subscription with
//! automatic resubscription.

pub mod collection;
pub mod feed;
pub mod mutator;
pub mod reconciler;

pub use collection::{ApplyOutcome, CachedEntry, CollectionStore, StoreEvent};
pub use feed::{ChangeFeedClient, FeedItem};
pub use mutator::{Confirmation, Mutation, MutationOutcome, OptimisticMutator, WriteOp};
pub use reconciler::{BulkLoader, HandleStatus, JsonLoader, JsonRowDecoder, Reconciler, RecordDecoder};
