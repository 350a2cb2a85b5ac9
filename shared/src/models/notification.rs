//! Notification model

use serde::{Deserialize, Serialize};

use super::Keyed;

/// Notification category, set by the originating admin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Message,
    Offer,
    Update,
    Alert,
}

/// Admin-to-merchant notification
///
/// `is_read` is monotonic from this engine's side: the merchant can mark
/// a notification read, never unread. Deletion is permanent; a deleted id
/// must not resurface from replayed feed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub merchant_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    /// UTC millis
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

impl Keyed for Notification {
    fn key(&self) -> &str {
        &self.id
    }
}
