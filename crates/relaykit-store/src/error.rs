//! Error types for the store module.

use thiserror::Error;

use relaykit_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be decoded back into a core value.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A different packet with the same (src, dst, seq) already exists.
    #[error("a different packet has already been delivered: {src} -> {dst} seq {seq}")]
    PacketConflict {
        src: String,
        dst: String,
        seq: String,
    },

    /// A packet the caller asked for is not stored.
    #[error("packet not found: {src} -> {dst} seq {seq}")]
    PacketMissing {
        src: String,
        dst: String,
        seq: String,
    },

    /// A registered packet handler failed; the delivery is retried on the
    /// next put of the same packet.
    #[error("packet handler failed: {0}")]
    Handler(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A remote endpoint proxy could not complete the operation. Carries
    /// the remote error as text; the variant does not survive the wire.
    #[error("remote endpoint error: {0}")]
    Remote(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
