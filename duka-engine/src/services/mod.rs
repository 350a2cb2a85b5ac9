//! Presentation-facing services
//!
//! One service per entity type. A service owns its collection's
//! reconciler + feed pair, scoped by a `CancellationToken`: dropping or
//! shutting down the service releases the subscription on every exit
//! path and discards feed callbacks that arrive afterwards. The
//! presentation layer reads snapshots through [`CollectionHandle`] and
//! triggers mutations through typed methods.

pub mod inventory;
pub mod merchant_status;
pub mod notifications;
pub mod orders;
pub mod payouts;
pub mod profile;
pub mod tracking;

pub use inventory::InventoryService;
pub use merchant_status::MerchantStatusService;
pub use notifications::NotificationsService;
pub use orders::OrdersService;
pub use payouts::PayoutsService;
pub use profile::fetch_merchant;

use std::sync::Arc;
use tokio::sync::watch;

use crate::sync::{CollectionStore, HandleStatus};
use shared::models::Keyed;

/// Read-only view of one cached collection: `{items, loading, error}`.
///
/// Cheap to clone and hand to the presentation layer; `items` is a fresh
/// sorted snapshot on every call, never a live reference.
pub struct CollectionHandle<T> {
    cache: Arc<CollectionStore<T>>,
    status: HandleStatus,
    sort: fn(&mut Vec<T>),
}

impl<T> CollectionHandle<T>
where
    T: Keyed + Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(
        cache: Arc<CollectionStore<T>>,
        status: HandleStatus,
        sort: fn(&mut Vec<T>),
    ) -> Self {
        Self {
            cache,
            status,
            sort,
        }
    }

    pub fn items(&self) -> Vec<T> {
        let mut items = self.cache.snapshot();
        (self.sort)(&mut items);
        items
    }

    /// True until the initial bulk load finishes (success or failure).
    pub fn loading(&self) -> bool {
        self.status.loading()
    }

    /// Last load/sync failure, if any. A failure never blanks `items`;
    /// the previous snapshot stays visible alongside this indicator.
    pub fn error(&self) -> Option<String> {
        self.status.error()
    }

    /// Changes whenever the snapshot does.
    pub fn changed(&self) -> watch::Receiver<u64> {
        self.cache.watch()
    }
}

impl<T> Clone for CollectionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            status: self.status.clone(),
            sort: self.sort,
        }
    }
}
