//! # Relaykit Sync
//!
//! The engine that converges two packet stores.
//!
//! ## Overview
//!
//! A synchronization run works on any two [`Endpoint`] implementations.
//! It merges the per-pair delivery watermarks so both sides agree on what
//! is already done, plans one transfer job per pair whose histories have
//! diverged, and moves packets counter by counter from the side that is
//! ahead to the side that is behind.
//!
//! ## Key Properties
//!
//! - **Idempotent**: a run right after a successful one moves nothing
//! - **Resumable**: watermarks persist, so an interrupted run picks up where it stopped
//! - **Bidirectional**: one run moves packets both ways, pair by pair
//! - **Transport-agnostic**: a remote store joins through [`ChannelEndpoint`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaykit_core::EndpointId;
//! use relaykit_store::SqliteEndpoint;
//! use relaykit_sync::{synchronize, SyncOptions};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let ours = SqliteEndpoint::open("ours.db", EndpointId::new("alpha")?)?;
//!     let theirs = SqliteEndpoint::open("theirs.db", EndpointId::new("bravo")?)?;
//!
//!     let report = synchronize(&ours, &theirs, &SyncOptions::default()).await?;
//!     println!("moved {} packets", report.packets_transferred);
//!     Ok(())
//! }
//! ```
//!
//! ## Remote Frame Flow
//!
//! ```text
//! ChannelEndpoint                     serve_endpoint
//!   |-------- Name ------------------->|
//!   |<------- Name("bravo") -----------|
//!   |-------- UpdateLowerBounds ------>|
//!   |<------- Bounds([..]) ------------|
//!   |-------- GetUpperBounds --------->|
//!   |<------- Bounds([..]) ------------|
//!   |-------- PutPacket -------------->|
//!   |<------- Unit --------------------|
//! ```

pub mod engine;
pub mod error;
pub mod plan;
pub mod rpc;

pub use engine::{synchronize, SyncOptions, SyncReport};
pub use error::{Result, SyncError};
pub use plan::{plan_job, Direction, SyncJob};
pub use rpc::{pipe, serve_endpoint, ChannelEndpoint, EndpointRequest, EndpointResponse};

// Re-exported so engine callers can name the trait without depending on
// the store crate directly.
pub use relaykit_store::Endpoint;
