//! Endpoint traits: the abstract interface for packet storage.
//!
//! [`Endpoint`] is the surface the synchronization engine consumes. It is
//! object-safe so a remote proxy can implement it over a transport.
//! [`LocalEndpoint`] extends it with operations that only make sense against
//! a store on this machine: handler registration, batch sends, and the
//! fragment staging used during reassembly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use relaykit_core::{Counter, EndpointId, Packet, SrcDstPair};

use crate::error::Result;

/// One watermark update, or a plain read when `lower_bound` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundUpdate {
    pub pair: SrcDstPair,
    pub lower_bound: Option<Counter>,
}

impl BoundUpdate {
    pub fn read(pair: SrcDstPair) -> Self {
        BoundUpdate { pair, lower_bound: None }
    }

    pub fn raise(pair: SrcDstPair, lower_bound: Counter) -> Self {
        BoundUpdate { pair, lower_bound: Some(lower_bound) }
    }
}

/// A partially received fragment group staged for reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentGroup {
    pub src: EndpointId,
    pub dst: EndpointId,
    /// Sequence counter of the group's first packet.
    pub group: Counter,
    /// Highest fragment counter seen so far, upper edge for cleanup.
    pub last_seq: Counter,
    /// Unix ms of the most recent fragment arrival.
    pub updated_at: u64,
}

/// Snapshot of a store's contents for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub name: String,
    pub is_leaf: bool,
    pub total_packets: u64,
    pub pairs: Vec<PairSummary>,
}

/// Watermarks and stored count for one (src, dst) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSummary {
    pub pair: SrcDstPair,
    pub lower_bound: Counter,
    pub upper_bound: Counter,
    pub stored: u64,
}

/// What a batch generator produces for one slot: everything except the
/// sequence counter, which the store assigns.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub dst: EndpointId,
    pub label: u32,
    pub payload: Bytes,
}

/// Produces the next packet of a batch, given the packets sent so far and
/// the slot index. Fragment senders use `sent[0].seq` as the group id.
pub type BatchFn = dyn Fn(&[Packet], usize) -> BatchItem + Send + Sync;

/// Side-effecting callback run when a packet reaches its destination store.
///
/// Handlers run in registration order, outside the store's internal lock,
/// so they may freely call back into the endpoint. A handler error fails
/// the enclosing `put_packet` and leaves the watermark unraised, which means
/// the same packet will be offered again on the next synchronization.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn on_packet(&self, endpoint: &dyn LocalEndpoint, packet: &Packet) -> Result<()>;
}

/// The Endpoint trait: the packet-store surface the synchronization engine
/// sees. Implementations include SQLite, in-memory (tests), and a remote
/// proxy speaking the wire protocol.
///
/// # Design Notes
///
/// - **Watermarks are monotone**: `update_lower_bound` never lowers a bound.
/// - **Packets are immutable**: a second put of the same (src, dst, seq)
///   must carry identical bytes or it is rejected as a conflict.
/// - **Obsolete puts are no-ops**: delivering below the watermark succeeds
///   silently; duplicate and late delivery is expected during sync.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The store's own name. Packets addressed to it are terminal here.
    fn name(&self) -> &EndpointId;

    /// Leaf stores only synchronize pairs touching their own name.
    fn is_leaf(&self) -> bool;

    // ─────────────────────────────────────────────────────────────────────────
    // Packet Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate the next sequence counter for (own name, `dst`), store the
    /// packet, and return it.
    async fn send_packet(&self, dst: &EndpointId, label: u32, payload: Bytes) -> Result<Packet>;

    /// Accept a packet during synchronization.
    ///
    /// Below the watermark: no-op. Addressed to this store: run handlers,
    /// then raise the watermark past it. Otherwise: store for relaying,
    /// rejecting a byte-different duplicate.
    async fn put_packet(&self, packet: &Packet) -> Result<()>;

    /// Fetch one stored packet, if present.
    async fn get_packet(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        seq: &Counter,
    ) -> Result<Option<Packet>>;

    /// Number of packets currently stored, across all pairs.
    async fn get_total_packet_count(&self) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Watermark Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Sorted distinct (src, dst) pairs with stored packets.
    async fn get_src_dst_pairs(&self) -> Result<Vec<SrcDstPair>>;

    /// The pair's watermark: max of the stored bound and the first stored
    /// packet's counter, zero if neither exists.
    async fn get_lower_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter>;

    /// One past the last stored packet's counter, or the lower bound when
    /// nothing is stored.
    async fn get_upper_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter>;

    /// Raise the watermark to `max(current, value)`, delete packets below
    /// it (sparing protected fragments addressed to this store), and return
    /// the effective bound. `None` reads without writing.
    async fn update_lower_bound(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        value: Option<&Counter>,
    ) -> Result<Counter>;

    /// Per-pair `get_lower_bound`, one transaction.
    async fn get_lower_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>>;

    /// Per-pair `get_upper_bound`, one transaction.
    async fn get_upper_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>>;

    /// Per-pair `update_lower_bound`, in order.
    async fn update_lower_bounds(&self, updates: &[BoundUpdate]) -> Result<Vec<Counter>>;
}

/// Extension surface for stores living in this process.
#[async_trait]
pub trait LocalEndpoint: Endpoint {
    /// Register a handler invoked for every packet whose destination is
    /// this store, in registration order.
    fn add_packet_handler(&self, handler: Arc<dyn PacketHandler>);

    /// Change whether this store participates in sync as a leaf.
    fn set_leaf(&self, leaf: bool);

    /// Run every registered handler against `packet`, in order, without
    /// touching storage or watermarks. The terminal path of `put_packet`
    /// goes through this, and the reassembly handler uses it to surface a
    /// reconstructed packet.
    async fn deliver(&self, packet: &Packet) -> Result<()>;

    /// Send `count` packets in one transaction with contiguous sequence
    /// counters per destination. The generator receives the packets sent so
    /// far and the slot index.
    async fn send_packet_batch(&self, count: usize, generator: Arc<BatchFn>)
        -> Result<Vec<Packet>>;

    /// Store a packet directly, bypassing watermark checks. Used by the
    /// reassembly handler to keep fragments addressed to this store, which
    /// the terminal path of `put_packet` would otherwise discard.
    ///
    /// Idempotent for identical bytes; a byte-different duplicate is a
    /// conflict like in `put_packet`.
    async fn stash_packet(&self, packet: &Packet) -> Result<()>;

    /// Count stored packets with `label` in the counter range
    /// (`after`, `upto`].
    async fn count_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<u64>;

    /// Fetch stored packets with `label` in (`after`, `upto`], ordered by
    /// counter.
    async fn packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<Vec<Packet>>;

    /// Delete all packets in [`from`, `to`] regardless of label.
    async fn remove_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        from: &Counter,
        to: &Counter,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Fragment Staging
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that a fragment of `group` arrived, extending the group's
    /// known range to `last_seq` and refreshing its timestamp.
    async fn touch_fragment_group(
        &self,
        src: &EndpointId,
        group: &Counter,
        last_seq: &Counter,
    ) -> Result<()>;

    /// Drop the staging row after reassembly or expiry.
    async fn clear_fragment_group(&self, src: &EndpointId, group: &Counter) -> Result<()>;

    /// Groups whose most recent fragment is older than `cutoff_ms`.
    async fn stale_fragment_groups(&self, cutoff_ms: u64) -> Result<Vec<FragmentGroup>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop all packets, watermarks, and staging state.
    async fn reset(&self) -> Result<()>;

    /// Snapshot bounds and counts for every stored pair.
    async fn state_summary(&self) -> Result<StateSummary>;
}
