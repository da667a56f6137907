//! Remote endpoint proxy.
//!
//! The engine only speaks [`Endpoint`], so a store on the far side of a
//! link joins a synchronization through [`ChannelEndpoint`]: every trait
//! call becomes one CBOR request frame and blocks on its reply frame.
//! [`serve_endpoint`] is the other half, answering frames out of a local
//! store until the peer hangs up.
//!
//! Frames are plain `Vec<u8>` over any channel pair, so the same protocol
//! runs over an in-process pipe in tests and a real link in production.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use relaykit_core::{Counter, EndpointId, Packet, SrcDstPair};
use relaykit_store::{BoundUpdate, Endpoint, Result as StoreResult, StoreError};

use crate::error::{Result, SyncError};

/// One forwarded [`Endpoint`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EndpointRequest {
    Name,
    IsLeaf,
    SendPacket {
        dst: EndpointId,
        label: u32,
        payload: Bytes,
    },
    PutPacket {
        packet: Packet,
    },
    GetPacket {
        src: EndpointId,
        dst: EndpointId,
        seq: Counter,
    },
    GetTotalPacketCount,
    GetSrcDstPairs,
    GetLowerBound {
        src: EndpointId,
        dst: EndpointId,
    },
    GetUpperBound {
        src: EndpointId,
        dst: EndpointId,
    },
    UpdateLowerBound {
        src: EndpointId,
        dst: EndpointId,
        value: Option<Counter>,
    },
    GetLowerBounds {
        pairs: Vec<SrcDstPair>,
    },
    GetUpperBounds {
        pairs: Vec<SrcDstPair>,
    },
    UpdateLowerBounds {
        updates: Vec<BoundUpdate>,
    },
}

/// The reply to one [`EndpointRequest`].
///
/// Errors cross the wire as text only. The proxy surfaces them as
/// [`StoreError::Remote`], so a conflict keeps its message but loses its
/// variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EndpointResponse {
    Name(EndpointId),
    IsLeaf(bool),
    Packet(Packet),
    MaybePacket(Option<Packet>),
    Count(u64),
    Pairs(Vec<SrcDstPair>),
    Bound(Counter),
    Bounds(Vec<Counter>),
    Unit,
    Error(String),
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("CBOR serialization failed");
    buf
}

fn unexpected(op: &str, got: &EndpointResponse) -> StoreError {
    StoreError::Remote(format!("{op}: unexpected response {got:?}"))
}

struct ChannelIo {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelIo {
    async fn call(&mut self, request: &EndpointRequest) -> StoreResult<EndpointResponse> {
        self.tx
            .send(encode(request))
            .await
            .map_err(|_| StoreError::Remote("peer disconnected".into()))?;
        let frame = self
            .rx
            .recv()
            .await
            .ok_or_else(|| StoreError::Remote("channel closed".into()))?;
        let response: EndpointResponse = ciborium::from_reader(frame.as_slice())
            .map_err(|e| StoreError::Remote(format!("undecodable response: {e}")))?;
        if let EndpointResponse::Error(message) = response {
            return Err(StoreError::Remote(message));
        }
        Ok(response)
    }
}

/// An [`Endpoint`] backed by a store on the far side of a frame channel.
///
/// The remote name and leaf flag are fetched once at connect time, since
/// the trait exposes them synchronously. The held lock spans a full
/// request/reply round trip, so concurrent callers cannot interleave
/// their frames.
pub struct ChannelEndpoint {
    name: EndpointId,
    leaf: bool,
    io: Mutex<ChannelIo>,
}

impl ChannelEndpoint {
    /// Handshake with the remote store and capture its identity.
    pub async fn connect(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Result<Self> {
        let mut io = ChannelIo { tx, rx };
        let name = match io.call(&EndpointRequest::Name).await? {
            EndpointResponse::Name(name) => name,
            other => {
                return Err(SyncError::Protocol(format!(
                    "connect: unexpected response {other:?}"
                )))
            }
        };
        let leaf = match io.call(&EndpointRequest::IsLeaf).await? {
            EndpointResponse::IsLeaf(leaf) => leaf,
            other => {
                return Err(SyncError::Protocol(format!(
                    "connect: unexpected response {other:?}"
                )))
            }
        };
        Ok(ChannelEndpoint {
            name,
            leaf,
            io: Mutex::new(io),
        })
    }

    async fn call(&self, request: &EndpointRequest) -> StoreResult<EndpointResponse> {
        self.io.lock().await.call(request).await
    }
}

#[async_trait]
impl Endpoint for ChannelEndpoint {
    fn name(&self) -> &EndpointId {
        &self.name
    }

    fn is_leaf(&self) -> bool {
        self.leaf
    }

    async fn send_packet(
        &self,
        dst: &EndpointId,
        label: u32,
        payload: Bytes,
    ) -> StoreResult<Packet> {
        let request = EndpointRequest::SendPacket {
            dst: dst.clone(),
            label,
            payload,
        };
        match self.call(&request).await? {
            EndpointResponse::Packet(packet) => Ok(packet),
            other => Err(unexpected("send_packet", &other)),
        }
    }

    async fn put_packet(&self, packet: &Packet) -> StoreResult<()> {
        let request = EndpointRequest::PutPacket {
            packet: packet.clone(),
        };
        match self.call(&request).await? {
            EndpointResponse::Unit => Ok(()),
            other => Err(unexpected("put_packet", &other)),
        }
    }

    async fn get_packet(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        seq: &Counter,
    ) -> StoreResult<Option<Packet>> {
        let request = EndpointRequest::GetPacket {
            src: src.clone(),
            dst: dst.clone(),
            seq: seq.clone(),
        };
        match self.call(&request).await? {
            EndpointResponse::MaybePacket(packet) => Ok(packet),
            other => Err(unexpected("get_packet", &other)),
        }
    }

    async fn get_total_packet_count(&self) -> StoreResult<u64> {
        match self.call(&EndpointRequest::GetTotalPacketCount).await? {
            EndpointResponse::Count(count) => Ok(count),
            other => Err(unexpected("get_total_packet_count", &other)),
        }
    }

    async fn get_src_dst_pairs(&self) -> StoreResult<Vec<SrcDstPair>> {
        match self.call(&EndpointRequest::GetSrcDstPairs).await? {
            EndpointResponse::Pairs(pairs) => Ok(pairs),
            other => Err(unexpected("get_src_dst_pairs", &other)),
        }
    }

    async fn get_lower_bound(&self, src: &EndpointId, dst: &EndpointId) -> StoreResult<Counter> {
        let request = EndpointRequest::GetLowerBound {
            src: src.clone(),
            dst: dst.clone(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bound(bound) => Ok(bound),
            other => Err(unexpected("get_lower_bound", &other)),
        }
    }

    async fn get_upper_bound(&self, src: &EndpointId, dst: &EndpointId) -> StoreResult<Counter> {
        let request = EndpointRequest::GetUpperBound {
            src: src.clone(),
            dst: dst.clone(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bound(bound) => Ok(bound),
            other => Err(unexpected("get_upper_bound", &other)),
        }
    }

    async fn update_lower_bound(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        value: Option<&Counter>,
    ) -> StoreResult<Counter> {
        let request = EndpointRequest::UpdateLowerBound {
            src: src.clone(),
            dst: dst.clone(),
            value: value.cloned(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bound(bound) => Ok(bound),
            other => Err(unexpected("update_lower_bound", &other)),
        }
    }

    async fn get_lower_bounds(&self, pairs: &[SrcDstPair]) -> StoreResult<Vec<Counter>> {
        let request = EndpointRequest::GetLowerBounds {
            pairs: pairs.to_vec(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bounds(bounds) => Ok(bounds),
            other => Err(unexpected("get_lower_bounds", &other)),
        }
    }

    async fn get_upper_bounds(&self, pairs: &[SrcDstPair]) -> StoreResult<Vec<Counter>> {
        let request = EndpointRequest::GetUpperBounds {
            pairs: pairs.to_vec(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bounds(bounds) => Ok(bounds),
            other => Err(unexpected("get_upper_bounds", &other)),
        }
    }

    async fn update_lower_bounds(&self, updates: &[BoundUpdate]) -> StoreResult<Vec<Counter>> {
        let request = EndpointRequest::UpdateLowerBounds {
            updates: updates.to_vec(),
        };
        match self.call(&request).await? {
            EndpointResponse::Bounds(bounds) => Ok(bounds),
            other => Err(unexpected("update_lower_bounds", &other)),
        }
    }
}

/// Answer [`Endpoint`] requests out of `endpoint` until the peer hangs up.
///
/// Method errors become [`EndpointResponse::Error`] frames and the loop
/// keeps serving; only a dead channel ends it.
pub async fn serve_endpoint<E>(
    endpoint: &E,
    mut rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<()>
where
    E: Endpoint + ?Sized,
{
    while let Some(frame) = rx.recv().await {
        let response = match ciborium::from_reader::<EndpointRequest, _>(frame.as_slice()) {
            Ok(request) => handle(endpoint, request).await,
            Err(e) => EndpointResponse::Error(format!("undecodable request: {e}")),
        };
        if tx.send(encode(&response)).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn handle<E>(endpoint: &E, request: EndpointRequest) -> EndpointResponse
where
    E: Endpoint + ?Sized,
{
    let result = match request {
        EndpointRequest::Name => Ok(EndpointResponse::Name(endpoint.name().clone())),
        EndpointRequest::IsLeaf => Ok(EndpointResponse::IsLeaf(endpoint.is_leaf())),
        EndpointRequest::SendPacket { dst, label, payload } => endpoint
            .send_packet(&dst, label, payload)
            .await
            .map(EndpointResponse::Packet),
        EndpointRequest::PutPacket { packet } => endpoint
            .put_packet(&packet)
            .await
            .map(|_| EndpointResponse::Unit),
        EndpointRequest::GetPacket { src, dst, seq } => endpoint
            .get_packet(&src, &dst, &seq)
            .await
            .map(EndpointResponse::MaybePacket),
        EndpointRequest::GetTotalPacketCount => endpoint
            .get_total_packet_count()
            .await
            .map(EndpointResponse::Count),
        EndpointRequest::GetSrcDstPairs => endpoint
            .get_src_dst_pairs()
            .await
            .map(EndpointResponse::Pairs),
        EndpointRequest::GetLowerBound { src, dst } => endpoint
            .get_lower_bound(&src, &dst)
            .await
            .map(EndpointResponse::Bound),
        EndpointRequest::GetUpperBound { src, dst } => endpoint
            .get_upper_bound(&src, &dst)
            .await
            .map(EndpointResponse::Bound),
        EndpointRequest::UpdateLowerBound { src, dst, value } => endpoint
            .update_lower_bound(&src, &dst, value.as_ref())
            .await
            .map(EndpointResponse::Bound),
        EndpointRequest::GetLowerBounds { pairs } => endpoint
            .get_lower_bounds(&pairs)
            .await
            .map(EndpointResponse::Bounds),
        EndpointRequest::GetUpperBounds { pairs } => endpoint
            .get_upper_bounds(&pairs)
            .await
            .map(EndpointResponse::Bounds),
        EndpointRequest::UpdateLowerBounds { updates } => endpoint
            .update_lower_bounds(&updates)
            .await
            .map(EndpointResponse::Bounds),
    };
    result.unwrap_or_else(|e| EndpointResponse::Error(e.to_string()))
}

/// Two stapled in-process channel halves. Hand one to
/// [`ChannelEndpoint::connect`] and the other to [`serve_endpoint`].
pub fn pipe(
    capacity: usize,
) -> (
    (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>),
    (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>),
) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    ((a_tx, a_rx), (b_tx, b_rx))
}
