//! Shared types for the Duka merchant platform
//!
//! Data models and change-feed wire types used by the sync engine and
//! any store backend, plus id/time utilities.

pub mod feed;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Change feed re-exports (for convenient access)
pub use feed::{ChangeEvent, ChangeOp};

// Model re-exports
pub use models::Keyed;
