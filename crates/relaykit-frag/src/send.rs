//! Splitting oversized payloads into fragment groups.

use std::sync::Arc;

use bytes::Bytes;

use relaykit_core::label::{FRAGMENT_FIRST, FRAGMENT_REST};
use relaykit_core::{EndpointId, Packet};
use relaykit_store::{BatchFn, BatchItem, LocalEndpoint, Result};

use crate::wire::{FirstFragment, RestFragment};

/// Cut `data` into `mtu`-sized chunks; the last one may be short.
///
/// # Panics
///
/// Panics when `mtu` is zero.
pub fn split_payload(data: &Bytes, mtu: usize) -> Vec<Bytes> {
    assert!(mtu > 0, "mtu must be positive");
    let mut chunks = Vec::with_capacity(data.len().div_ceil(mtu));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + mtu).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Send `payload` to `dst` as one fragment group.
///
/// The first packet carries the logical label and the chunk count; every
/// following packet carries one chunk tagged with the first packet's
/// counter. The batch allocates the whole group in a single transaction,
/// so the group owns a contiguous counter range.
///
/// Returns the logical packet a receiver will eventually observe: original
/// label, group id as the counter, intact payload.
pub async fn send_large(
    endpoint: &dyn LocalEndpoint,
    dst: &EndpointId,
    label: u32,
    payload: Bytes,
    mtu: usize,
) -> Result<Packet> {
    let chunks = split_payload(&payload, mtu);
    let count = chunks.len();
    let header = FirstFragment { label, count: count as u32 }.encode();

    let to = dst.clone();
    let generator: Arc<BatchFn> = Arc::new(move |sent: &[Packet], i: usize| {
        if i == 0 {
            BatchItem {
                dst: to.clone(),
                label: FRAGMENT_FIRST,
                payload: header.clone(),
            }
        } else {
            let rest = RestFragment {
                group: sent[0].seq.clone(),
                chunk: chunks[i - 1].clone(),
            };
            BatchItem {
                dst: to.clone(),
                label: FRAGMENT_REST,
                payload: rest.encode(),
            }
        }
    });

    let sent = endpoint.send_packet_batch(count + 1, generator).await?;
    tracing::debug!(
        "fragmented {} bytes into {} packets for {}",
        payload.len(),
        count + 1,
        dst
    );

    Ok(Packet {
        src: endpoint.name().clone(),
        dst: dst.clone(),
        seq: sent[0].seq.clone(),
        label,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relaykit_store::{Endpoint, MemoryEndpoint};

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s).unwrap()
    }

    #[test]
    fn test_split_exact_multiple() {
        let data = Bytes::from(vec![0u8; 40]);
        let chunks = split_payload(&data, 8);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 8));
    }

    #[test]
    fn test_split_short_tail() {
        let data = Bytes::from_static(b"0123456789");
        let chunks = split_payload(&data, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].as_ref(), b"89");
    }

    #[test]
    fn test_split_empty() {
        assert!(split_payload(&Bytes::new(), 8).is_empty());
    }

    #[test]
    fn test_split_mtu_larger_than_data() {
        let data = Bytes::from_static(b"tiny");
        let chunks = split_payload(&data, 1000);
        assert_eq!(chunks, vec![data]);
    }

    proptest! {
        #[test]
        fn test_split_concat_round_trip(data in proptest::collection::vec(any::<u8>(), 0..200), mtu in 1usize..50) {
            let data = Bytes::from(data);
            let chunks = split_payload(&data, mtu);
            prop_assert!(chunks.iter().all(|c| c.len() <= mtu));
            let glued: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
            prop_assert_eq!(glued, data.to_vec());
        }
    }

    #[tokio::test]
    async fn test_send_large_builds_group() {
        let ep = MemoryEndpoint::new(id("a"));
        let payload = Bytes::from(vec![9u8; 40]);

        let logical = send_large(&ep, &id("b"), 7, payload.clone(), 8).await.unwrap();
        assert_eq!(logical.label, 7);
        assert_eq!(logical.payload, payload);

        // One first packet plus five chunks, contiguous from the group id.
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 6);
        let first = ep
            .get_packet(&id("a"), &id("b"), &logical.seq)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.label, FRAGMENT_FIRST);
        let header = FirstFragment::decode(&first.payload).unwrap();
        assert_eq!(header, FirstFragment { label: 7, count: 5 });

        for i in 1..=5u64 {
            let seq = logical.seq.add(i);
            let part = ep.get_packet(&id("a"), &id("b"), &seq).await.unwrap().unwrap();
            assert_eq!(part.label, FRAGMENT_REST);
            let rest = RestFragment::decode(&part.payload).unwrap();
            assert_eq!(rest.group, logical.seq);
            assert_eq!(rest.chunk.len(), 8);
        }
    }

    #[tokio::test]
    async fn test_send_large_single_chunk() {
        let ep = MemoryEndpoint::new(id("a"));
        let logical = send_large(&ep, &id("b"), 3, Bytes::from_static(b"small"), 100)
            .await
            .unwrap();
        // Still a group: one first packet and one chunk.
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 2);
        assert_eq!(logical.payload.as_ref(), b"small");
    }
}
