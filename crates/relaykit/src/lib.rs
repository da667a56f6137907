//! # Relaykit
//!
//! Store-and-forward message relay for intermittently connected nodes.
//!
//! ## Overview
//!
//! Relaykit moves opaque payloads between named nodes that are rarely
//! online at the same time. Every node carries a packet store; whenever
//! any two nodes meet, one synchronization run levels their histories,
//! so a payload hops store to store until it reaches its destination.
//!
//! - **Packets**: Immutable payloads ordered per (source, destination) pair
//! - **Watermarks**: Per-pair delivery bounds that garbage-collect the relays
//! - **Fragmentation**: Payloads above the MTU travel as fragment groups
//! - **Sync**: Pairwise convergence of any two stores, local or remote
//!
//! ## Key Concepts
//!
//! - **Packet**: Immutable. Sequenced by a fixed-width hex counter.
//! - **Terminal delivery**: A packet reaching its named destination runs
//!   handlers instead of being stored.
//! - **Leaf node**: Synchronizes only traffic touching its own name.
//! - **Relay node**: Carries traffic for anyone.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use relaykit::{EndpointId, RelayConfig, RelayNode};
//!
//! async fn example() -> relaykit::Result<()> {
//!     let alpha = RelayNode::open("alpha.db", EndpointId::new("alpha")?, RelayConfig::default())?;
//!     let bravo = RelayNode::open("bravo.db", EndpointId::new("bravo")?, RelayConfig::default())?;
//!
//!     // Queue a payload for a node we may never meet directly.
//!     alpha.send(&EndpointId::new("charlie")?, 7, Bytes::from_static(b"hello")).await?;
//!
//!     // Whenever two nodes meet, level their histories.
//!     let report = alpha.sync_with(bravo.endpoint()).await?;
//!     println!("moved {} packets", report.packets_transferred);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `relaykit::core` - Core primitives (Counter, Packet, EndpointId)
//! - `relaykit::store` - Storage abstraction and SQLite backend
//! - `relaykit::frag` - Fragmentation and reassembly
//! - `relaykit::sync` - Synchronization engine and remote proxy

pub mod error;
pub mod node;

// Re-export component crates
pub use relaykit_core as core;
pub use relaykit_frag as frag;
pub use relaykit_store as store;
pub use relaykit_sync as sync;

// Re-export main types for convenience
pub use error::{RelayError, Result};
pub use node::{RelayConfig, RelayNode};

// Re-export commonly used component types
pub use relaykit_core::{Counter, EndpointId, LightPacket, Packet, SrcDstPair};
pub use relaykit_store::{
    Endpoint, LocalEndpoint, MemoryEndpoint, PacketHandler, SqliteEndpoint, StateSummary,
};
pub use relaykit_sync::{ChannelEndpoint, SyncOptions, SyncReport};
