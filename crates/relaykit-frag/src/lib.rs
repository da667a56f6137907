//! # Relaykit Frag
//!
//! Fragmentation and reassembly of oversized payloads.
//!
//! ## Overview
//!
//! Transports impose a maximum payload size, so a large payload is split
//! into a group of ordinary packets and put back together at the
//! destination. A group rides on two reserved labels:
//!
//! - **First packet** (`FRAGMENT_FIRST`): carries the logical label and the
//!   number of continuation packets. Its sequence counter is the **group
//!   id**.
//! - **Continuation packets** (`FRAGMENT_REST`): each carries the group id
//!   and one chunk of the payload.
//!
//! The whole group is sent in one batch, so it owns a contiguous counter
//! range starting at the group id. Reassembly exploits that: a group with
//! first packet at `G` and `n` chunks is complete exactly when `n`
//! continuation packets sit in `(G, G+n]`, no matter in which order they
//! arrived.
//!
//! ## Key Types
//!
//! - [`send_large`] - split a payload and send the group in one batch
//! - [`Reassembler`] - the packet handler that stages fragments and
//!   delivers the reconstructed packet
//! - [`expire_groups`] - TTL sweep for groups that never completed
//! - [`FirstFragment`] / [`RestFragment`] - the fragment payload codecs
//!
//! ## Delivery Semantics
//!
//! Fragments addressed to this store arrive through the normal terminal
//! path, which raises the watermark per fragment so upstream relays can
//! retire their copies immediately. The [`Reassembler`] stashes each
//! fragment locally (the watermark sweep spares fragment labels at the
//! destination), and once the group is complete it synthesizes the logical
//! packet with the group id as its counter, runs it through the store's
//! handlers, and drops the staged fragments.

pub mod reassemble;
pub mod send;
pub mod wire;

pub use reassemble::{expire_groups, Reassembler};
pub use send::{send_large, split_payload};
pub use wire::{FirstFragment, RestFragment};
