//! The relay node: unified API over storage, fragmentation, and sync.
//!
//! A [`RelayNode`] wraps one packet store, wires the reassembly handler
//! into it, and sizes outgoing payloads against the configured MTU so
//! callers never deal with fragment packets directly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use relaykit_core::{label, EndpointId, Packet};
use relaykit_frag::{expire_groups, send_large, Reassembler};
use relaykit_store::{
    Endpoint, FragmentGroup, LocalEndpoint, PacketHandler, SqliteEndpoint, StateSummary,
};
use relaykit_sync::{serve_endpoint, synchronize, SyncOptions, SyncReport};

use crate::error::{RelayError, Result};

/// Configuration for a relay node.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Payloads above this size are split into a fragment group on send.
    pub mtu: usize,
    /// Staged fragment groups older than this are dropped by
    /// [`RelayNode::expire_fragments`].
    pub fragment_ttl_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mtu: 100_000,
            fragment_ttl_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// A store plus the policy around it.
///
/// Handlers registered through [`on_packet`](RelayNode::on_packet) see
/// whole payloads only; fragment bookkeeping packets are consumed by the
/// reassembly handler the node installs at construction.
pub struct RelayNode<E: LocalEndpoint> {
    endpoint: Arc<E>,
    config: RelayConfig,
}

impl RelayNode<SqliteEndpoint> {
    /// Open a node backed by a SQLite file.
    pub fn open(path: impl AsRef<Path>, name: EndpointId, config: RelayConfig) -> Result<Self> {
        Ok(Self::new(SqliteEndpoint::open(path, name)?, config))
    }

    /// Open a node backed by an in-memory database.
    pub fn open_memory(name: EndpointId, config: RelayConfig) -> Result<Self> {
        Ok(Self::new(SqliteEndpoint::open_memory(name)?, config))
    }
}

impl<E: LocalEndpoint + 'static> RelayNode<E> {
    /// Wrap an endpoint. Installs the reassembly handler so fragment
    /// groups addressed to this node come back out whole.
    pub fn new(endpoint: E, config: RelayConfig) -> Self {
        let endpoint = Arc::new(endpoint);
        endpoint.add_packet_handler(Arc::new(Reassembler));
        Self { endpoint, config }
    }

    /// The node's own name.
    pub fn name(&self) -> &EndpointId {
        self.endpoint.name()
    }

    pub fn is_leaf(&self) -> bool {
        self.endpoint.is_leaf()
    }

    /// Leaf nodes only synchronize traffic touching their own name;
    /// relays carry everything.
    pub fn set_leaf(&self, leaf: bool) {
        self.endpoint.set_leaf(leaf)
    }

    /// Get the underlying endpoint.
    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Register a delivery callback for packets addressed to this node.
    pub fn on_packet(&self, handler: Arc<dyn PacketHandler>) {
        self.endpoint
            .add_packet_handler(Arc::new(FilterFragments(handler)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a payload for `dst`.
    ///
    /// Payloads above the configured MTU split into a fragment group
    /// transparently; the returned packet is the logical one either way,
    /// and its counter names the whole group.
    pub async fn send(&self, dst: &EndpointId, label: u32, payload: Bytes) -> Result<Packet> {
        if label::is_fragment(label) {
            return Err(RelayError::ReservedLabel(label));
        }
        if payload.len() <= self.config.mtu {
            Ok(self.endpoint.send_packet(dst, label, payload).await?)
        } else {
            Ok(send_large(self.endpoint.as_ref(), dst, label, payload, self.config.mtu).await?)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one synchronization against any other endpoint, local or
    /// remote.
    pub async fn sync_with<T>(&self, other: &T) -> Result<SyncReport>
    where
        T: Endpoint + ?Sized,
    {
        self.sync_with_options(other, &SyncOptions::default()).await
    }

    /// [`sync_with`](RelayNode::sync_with) with progress reporting.
    pub async fn sync_with_options<T>(&self, other: &T, options: &SyncOptions) -> Result<SyncReport>
    where
        T: Endpoint + ?Sized,
    {
        Ok(synchronize(self.endpoint.as_ref(), other, options).await?)
    }

    /// Serve this node's store over a frame channel until the peer
    /// disconnects. The far side drives the run through a
    /// [`ChannelEndpoint`](relaykit_sync::ChannelEndpoint).
    pub async fn serve(
        &self,
        rx: mpsc::Receiver<Vec<u8>>,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        Ok(serve_endpoint(self.endpoint.as_ref(), rx, tx).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop staged fragment groups older than the configured TTL and
    /// return them. Run this periodically; an incomplete group whose
    /// sender died would otherwise stay staged forever.
    pub async fn expire_fragments(&self) -> Result<Vec<FragmentGroup>> {
        Ok(expire_groups(self.endpoint.as_ref(), self.config.fragment_ttl_ms).await?)
    }

    /// Snapshot of the store: per-pair watermarks and totals.
    pub async fn state_summary(&self) -> Result<StateSummary> {
        Ok(self.endpoint.state_summary().await?)
    }

    /// Drop every packet, watermark, and staged fragment group.
    pub async fn reset(&self) -> Result<()> {
        Ok(self.endpoint.reset().await?)
    }
}

/// Keeps fragment bookkeeping out of application handlers.
struct FilterFragments(Arc<dyn PacketHandler>);

#[async_trait]
impl PacketHandler for FilterFragments {
    async fn on_packet(
        &self,
        endpoint: &dyn LocalEndpoint,
        packet: &Packet,
    ) -> relaykit_store::Result<()> {
        if label::is_fragment(packet.label) {
            return Ok(());
        }
        self.0.on_packet(endpoint, packet).await
    }
}
