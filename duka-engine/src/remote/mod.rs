//! Remote store capability
//!
//! The persistent store is an external collaborator; the engine only
//! sees the [`RemoteStore`] trait. [`MemoryStore`] is the in-process
//! implementation used by tests and demos.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{FeedSubscription, OrderBy, RemoteStore, RowFilter, StoreError};
