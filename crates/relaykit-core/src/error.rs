//! Error types for the relaykit core primitives.

use thiserror::Error;

/// Errors produced while constructing or decoding core values.
///
/// Counters and packets are system-generated, so these errors only
/// surface at trust boundaries: RPC decoding and storage reads.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed counter: {0:?}")]
    MalformedCounter(String),

    #[error("invalid endpoint id: {0:?}")]
    InvalidEndpointId(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("malformed fragment payload: {0}")]
    MalformedFragment(String),
}
