//! # Relaykit Core
//!
//! Pure primitives for relaykit: counters, packets, and pair algebra.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the values the store and sync layers move around.
//!
//! ## Key Types
//!
//! - [`Counter`] - Fixed-width hex sequence counter; string order is numeric order
//! - [`Packet`] / [`LightPacket`] - Full and probe forms of a message
//! - [`EndpointId`] - The name of a packet store
//! - [`SrcDstPair`] - One direction of traffic between two stores
//!
//! ## Encoding
//!
//! Packets encode to untagged byte sequences; the decoder distinguishes the
//! light and full forms by length. See [`packet`].

pub mod counter;
pub mod error;
pub mod label;
pub mod packet;
pub mod pair;

pub use counter::{now_millis, Counter, COUNTER_BYTES, COUNTER_WIDTH};
pub use error::CoreError;
pub use packet::{EndpointId, LightPacket, Packet, PacketForm};
pub use pair::{filter_by_name, pair_union, SrcDstPair};
