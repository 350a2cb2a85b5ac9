//! Derived read-models
//!
//! Aggregates computed from cached collections. Today's revenue is
//! incremental (a counted-id set keeps it correct under replays); the
//! unread count and the bucket summaries are pure functions of a
//! snapshot, recomputed on read so they can never drift from the cache.

pub mod revenue;
pub mod snapshot;

pub use revenue::RevenueToday;
pub use snapshot::{
    InventoryBuckets, OrderStatusBuckets, inventory_buckets, order_status_buckets, unread_count,
};
