//! Error types for the sync module.

use thiserror::Error;

use crate::engine::SyncReport;

/// Errors that can occur while synchronizing two endpoints.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Both sides carry the same name; there is nothing to synchronize.
    #[error("cannot synchronize {0} with itself")]
    SameEndpoint(String),

    /// The sending side lacks a packet inside a planned range. Ranges are
    /// contiguous by construction, so a hole is a protocol violation, not
    /// a retryable condition.
    #[error("missing packet on {holder}: {src} -> {dst} seq {seq}")]
    MissingPacket {
        holder: String,
        src: String,
        dst: String,
        seq: String,
    },

    /// A job failed partway. `report` accounts for the work already done;
    /// the persisted watermarks make a rerun resume where this one stopped.
    #[error(
        "sync aborted after {} of {} packets: {source}",
        report.packets_transferred,
        report.packets_planned
    )]
    Aborted {
        report: SyncReport,
        source: Box<SyncError>,
    },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] relaykit_store::StoreError),

    /// The remote side answered with something the protocol does not allow
    /// at this point.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
