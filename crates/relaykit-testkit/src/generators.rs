//! Proptest generators for property-based testing.

use proptest::prelude::*;

use bytes::Bytes;
use relaykit_core::{label, Counter, EndpointId, LightPacket, Packet, SrcDstPair, COUNTER_WIDTH};

/// Generate a default-width counter.
pub fn counter() -> impl Strategy<Value = Counter> {
    any::<u64>().prop_map(|n| Counter::from_number(n, COUNTER_WIDTH))
}

/// Generate an endpoint name.
pub fn endpoint_id() -> impl Strategy<Value = EndpointId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|s| EndpointId::new(s).expect("generated ascii name"))
}

/// Generate an application label, avoiding the reserved fragment range.
pub fn app_label() -> impl Strategy<Value = u32> {
    any::<u32>().prop_filter("reserved label", |l| !label::is_fragment(*l))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a (src, dst) pair.
pub fn src_dst_pair() -> impl Strategy<Value = SrcDstPair> {
    (endpoint_id(), endpoint_id()).prop_map(|(src, dst)| SrcDstPair::new(src, dst))
}

/// Parameters for generating a packet.
#[derive(Debug, Clone)]
pub struct PacketParams {
    pub src: EndpointId,
    pub dst: EndpointId,
    pub seq: u64,
    pub label: u32,
    pub payload: Vec<u8>,
}

impl Arbitrary for PacketParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (endpoint_id(), endpoint_id(), any::<u64>(), app_label(), payload(512))
            .prop_map(|(src, dst, seq, label, payload)| PacketParams {
                src,
                dst,
                seq,
                label,
                payload,
            })
            .boxed()
    }
}

/// Build a packet from parameters.
pub fn packet_from_params(params: &PacketParams) -> Packet {
    Packet {
        src: params.src.clone(),
        dst: params.dst.clone(),
        seq: Counter::from_number(params.seq, COUNTER_WIDTH),
        label: params.label,
        payload: Bytes::from(params.payload.clone()),
    }
}
