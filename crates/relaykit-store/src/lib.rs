//! # Relaykit Store
//!
//! Packet persistence for the relay. Provides the trait-based endpoint
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! An endpoint is a named packet store plus the per-pair watermarks that
//! drive synchronization. The [`Endpoint`] trait is the capability surface
//! the sync engine consumes; it is deliberately small enough to implement
//! over a network proxy. [`LocalEndpoint`] extends it with the operations
//! only an in-process store can offer, such as packet handlers and
//! reassembly staging.
//!
//! ## Key Types
//!
//! - [`Endpoint`] - The async trait the sync engine consumes
//! - [`LocalEndpoint`] - Extension trait for in-process stores
//! - [`SqliteEndpoint`] - SQLite-based persistent storage
//! - [`MemoryEndpoint`] - In-memory storage for tests
//! - [`PacketHandler`] - Callback invoked on terminal delivery
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaykit_store::{Endpoint, SqliteEndpoint};
//! use relaykit_core::EndpointId;
//! use bytes::Bytes;
//!
//! async fn example() {
//!     let name = EndpointId::new("alice").unwrap();
//!     let ep = SqliteEndpoint::open("alice.db", name).unwrap();
//!
//!     // Or use an in-memory database for testing
//!     // let ep = SqliteEndpoint::open_memory(name).unwrap();
//!
//!     let dst = EndpointId::new("bob").unwrap();
//!     let packet = ep.send_packet(&dst, 7, Bytes::from_static(b"hello")).await.unwrap();
//!     println!("assigned counter {}", packet.seq);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent puts**: Storing the same packet twice is a no-op
//! - **Conflict detection**: A byte-different packet at the same (src, dst, seq) is an error
//! - **Watermarks**: Lower bounds only move forward and garbage-collect retired packets
//! - **Terminal delivery**: Packets addressed to the store go to handlers, never to disk

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryEndpoint;
pub use sqlite::SqliteEndpoint;
pub use traits::{
    BatchFn, BatchItem, BoundUpdate, Endpoint, FragmentGroup, LocalEndpoint, PacketHandler,
    PairSummary, StateSummary,
};
