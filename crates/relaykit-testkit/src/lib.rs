//! # Relaykit Testkit
//!
//! Testing utilities for relaykit.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Pinned wire encodings for counters, packets, and fragments
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: In-memory relay stores pre-wired for test scenarios
//!
//! ## Golden Vectors
//!
//! Golden vectors keep the wire formats honest across changes and
//! implementations:
//!
//! ```rust
//! use relaykit_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, got) in verify_all_vectors() {
//!     assert!(matches, "{name} produced {got}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use relaykit_testkit::generators::{packet_from_params, PacketParams};
//!
//! proptest! {
//!     #[test]
//!     fn encoding_is_deterministic(params: PacketParams) {
//!         let p1 = packet_from_params(&params);
//!         let p2 = packet_from_params(&params);
//!         prop_assert_eq!(p1.encode(), p2.encode());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up relay scenarios:
//!
//! ```rust
//! use relaykit_testkit::fixtures::TestRelay;
//!
//! let relay = TestRelay::new("alpha");
//! assert_eq!(relay.name().as_str(), "alpha");
//! assert!(relay.inbox.is_empty());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{patterned_payload, random_payload, relay_chain, sweep, Inbox, TestRelay};
pub use generators::{packet_from_params, PacketParams};
pub use vectors::{
    counter_vectors, fragment_vectors, packet_vectors, verify_all_vectors, CounterVector,
    FragmentVector, PacketVector,
};
