// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Error types for the operation store.

use thiserror::Error;

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The storage layer could not complete a read or write.
    #[error("storage failed: {0}")]
    Storage(String),

    /// The backend has been destroyed and accepts no more requests.
    #[error("backend destroyed")]
    Destroyed,
}

impl BackendError {
    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        return Self::Storage(msg.into());
    }
}

/// Errors surfaced by the operation store.
///
/// Causal gaps and repeated deliveries are not errors: the former stay
/// buffered, the latter are no-ops.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A local id was requested before the local user id was set.
    #[error("operation store not yet initialized: no local user id")]
    Uninitialized,

    /// A backend call failed; the transaction body was aborted.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
