//! Unified Error Handling
//!
//! The engine-level error taxonomy. Remote failures are classified here
//! so every caller sees the same four outcome families: transient
//! (retried internally), validation (rejected before any remote call),
//! conflict (optimistic write rejected, state rolled back), not-found.
//! The engine never panics on a remote error; every mutation path has an
//! explicit rollback branch.

use crate::remote::StoreError;

/// Engine-level error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========== Retried internally, surfaced only past policy ==========
    #[error("Transient network error: {0}")]
    Transient(String),

    // ========== Rejected locally, no remote call issued ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    // ========== Optimistic write rejected; local state rolled back ==========
    #[error("State changed, please retry: {0}")]
    Conflict(String),

    // ========== Missing resource ==========
    #[error("Not found: {0}")]
    NotFound(String),

    // ========== System Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => Self::Transient(msg),
            StoreError::Timeout(ms) => Self::Transient(format!("timed out after {ms} ms")),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Serialization(e) => Self::Internal(e.to_string()),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Engine-level Result type
pub type EngineResult<T> = Result<T, EngineError>;
