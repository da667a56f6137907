//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: in-memory relay stores with
//! an inbox handler wired in, chains of them, and payload generators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;

use relaykit_core::{label, EndpointId, Packet};
use relaykit_frag::Reassembler;
use relaykit_store::{Endpoint, LocalEndpoint, MemoryEndpoint, PacketHandler};
use relaykit_sync::{synchronize, SyncOptions, SyncReport};

/// Collects packets delivered to a store, skipping fragment bookkeeping.
#[derive(Default)]
pub struct Inbox {
    packets: Mutex<Vec<Packet>>,
}

impl Inbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Inbox::default())
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.packets.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.packets.lock().unwrap().iter().map(|p| p.payload.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PacketHandler for Inbox {
    async fn on_packet(
        &self,
        _endpoint: &dyn LocalEndpoint,
        packet: &Packet,
    ) -> relaykit_store::Result<()> {
        if !label::is_fragment(packet.label) {
            self.packets.lock().unwrap().push(packet.clone());
        }
        Ok(())
    }
}

/// An in-memory store with reassembly and an [`Inbox`] already wired in.
pub struct TestRelay {
    pub endpoint: MemoryEndpoint,
    pub inbox: Arc<Inbox>,
}

impl TestRelay {
    /// A leaf store named `name`.
    pub fn new(name: &str) -> Self {
        let endpoint = MemoryEndpoint::new(
            EndpointId::new(name).expect("valid endpoint name"),
        );
        endpoint.add_packet_handler(Arc::new(Reassembler));
        let inbox = Inbox::new();
        endpoint.add_packet_handler(inbox.clone());
        Self { endpoint, inbox }
    }

    /// A relay store: carries traffic for anyone.
    pub fn relay(name: &str) -> Self {
        let fixture = Self::new(name);
        fixture.endpoint.set_leaf(false);
        fixture
    }

    pub fn name(&self) -> &EndpointId {
        self.endpoint.name()
    }
}

/// A line of stores: leaves at both ends, relays in between.
pub fn relay_chain(names: &[&str]) -> Vec<TestRelay> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            if i == 0 || i == names.len() - 1 {
                TestRelay::new(name)
            } else {
                TestRelay::relay(name)
            }
        })
        .collect()
}

/// One left-to-right pass: synchronize each adjacent pair in order.
/// Returns the reports, one per hop.
pub async fn sweep(chain: &[TestRelay]) -> relaykit_sync::Result<Vec<SyncReport>> {
    let mut reports = Vec::with_capacity(chain.len().saturating_sub(1));
    for pair in chain.windows(2) {
        reports.push(synchronize(&pair[0].endpoint, &pair[1].endpoint, &SyncOptions::default()).await?);
    }
    Ok(reports)
}

/// Random bytes of the given length.
pub fn random_payload(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    Bytes::from(data)
}

/// Deterministic bytes of the given length. The 251-cycle keeps chunk
/// boundaries from lining up with the pattern.
pub fn patterned_payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaykit_store::Endpoint;

    #[tokio::test]
    async fn test_chain_shape() {
        let chain = relay_chain(&["a", "b", "c", "d"]);
        assert!(chain[0].endpoint.is_leaf());
        assert!(!chain[1].endpoint.is_leaf());
        assert!(!chain[2].endpoint.is_leaf());
        assert!(chain[3].endpoint.is_leaf());
    }

    #[tokio::test]
    async fn test_one_sweep_delivers_across_the_chain() {
        let chain = relay_chain(&["a", "b", "c"]);
        chain[0]
            .endpoint
            .send_packet(chain[2].name(), 7, Bytes::from_static(b"across"))
            .await
            .unwrap();

        let reports = sweep(&chain).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].packets_transferred, 1);
        assert_eq!(reports[1].packets_transferred, 1);
        assert_eq!(chain[2].inbox.payloads(), vec![Bytes::from_static(b"across")]);
    }

    #[test]
    fn test_payload_generators() {
        assert_eq!(random_payload(40).len(), 40);
        assert_eq!(patterned_payload(300), patterned_payload(300));
        assert_eq!(patterned_payload(3).as_ref(), &[0, 1, 2]);
    }
}
