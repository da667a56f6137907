//! Well-known packet labels.
//!
//! Labels are application-defined message types. The values here are the
//! only ones the library itself interprets; applications should pick their
//! own labels outside the reserved range.

/// First packet of a fragmented message. Payload: {original label, count}.
pub const FRAGMENT_FIRST: u32 = 132;

/// Continuation packet of a fragmented message. Payload: {group id, chunk}.
pub const FRAGMENT_REST: u32 = 133;

/// Labels the fragmentation layer consumes before application handlers see
/// a packet.
pub fn is_fragment(label: u32) -> bool {
    label == FRAGMENT_FIRST || label == FRAGMENT_REST
}
