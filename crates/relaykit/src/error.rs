//! Error types for the relay node.

use relaykit_core::CoreError;
use relaykit_store::StoreError;
use relaykit_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during relay node operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Core primitive error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The label is reserved for fragment bookkeeping.
    #[error("label {0} is reserved for fragment bookkeeping")]
    ReservedLabel(u32),
}

/// Result type for relay node operations.
pub type Result<T> = std::result::Result<T, RelayError>;
