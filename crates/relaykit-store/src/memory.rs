//! In-memory implementation of the Endpoint traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use relaykit_core::{label, Counter, EndpointId, Packet, SrcDstPair, COUNTER_WIDTH};

use crate::error::{Result, StoreError};
use crate::traits::{
    BatchFn, BoundUpdate, Endpoint, FragmentGroup, LocalEndpoint, PacketHandler, PairSummary,
    StateSummary,
};

/// In-memory endpoint implementation.
///
/// All data is lost when the endpoint is dropped. Thread-safe via RwLock.
pub struct MemoryEndpoint {
    name: EndpointId,
    inner: RwLock<MemoryEndpointInner>,
    handlers: RwLock<Vec<Arc<dyn PacketHandler>>>,
    leaf: AtomicBool,
}

#[derive(Default)]
struct MemoryEndpointInner {
    /// Packets per pair, ordered by counter.
    packets: BTreeMap<SrcDstPair, BTreeMap<Counter, Packet>>,

    /// Explicitly raised watermarks.
    lower_bounds: HashMap<SrcDstPair, Counter>,

    /// Reassembly staging: (src, group) -> highest fragment seen.
    fragment_groups: HashMap<(EndpointId, Counter), (Counter, u64)>,
}

impl MemoryEndpointInner {
    fn lower_bound(&self, pair: &SrcDstPair) -> Counter {
        let stored = self.lower_bounds.get(pair).cloned();
        let first = self
            .packets
            .get(pair)
            .and_then(|map| map.keys().next().cloned());

        stored
            .unwrap_or_else(|| Counter::zero(COUNTER_WIDTH))
            .max(first.unwrap_or_else(|| Counter::zero(COUNTER_WIDTH)))
    }

    fn upper_bound(&self, pair: &SrcDstPair) -> Counter {
        match self.packets.get(pair).and_then(|map| map.keys().next_back()) {
            Some(last) => last.inc(),
            None => self.lower_bound(pair),
        }
    }

    fn next_seq(&self, pair: &SrcDstPair) -> Counter {
        let ub = self.upper_bound(pair);
        if ub.is_zero() {
            Counter::from_time(COUNTER_WIDTH)
        } else {
            ub
        }
    }

    fn insert(&mut self, packet: Packet) {
        let pair = SrcDstPair::new(packet.src.clone(), packet.dst.clone());
        self.packets
            .entry(pair)
            .or_default()
            .insert(packet.seq.clone(), packet);
    }

    fn store_dedup(&mut self, packet: &Packet) -> Result<()> {
        let pair = SrcDstPair::new(packet.src.clone(), packet.dst.clone());
        match self.packets.get(&pair).and_then(|map| map.get(&packet.seq)) {
            Some(existing) if existing == packet => Ok(()),
            Some(_) => Err(StoreError::PacketConflict {
                src: packet.src.to_string(),
                dst: packet.dst.to_string(),
                seq: packet.seq.to_string(),
            }),
            None => {
                self.insert(packet.clone());
                Ok(())
            }
        }
    }

    fn apply_lower_bound(
        &mut self,
        own_name: &EndpointId,
        pair: &SrcDstPair,
        value: Option<&Counter>,
    ) -> Counter {
        let current = self.lower_bound(pair);
        let Some(value) = value else {
            return current;
        };
        if current >= *value {
            return current;
        }

        self.lower_bounds.insert(pair.clone(), value.clone());

        if let Some(map) = self.packets.get_mut(pair) {
            let protect = pair.dst == *own_name;
            map.retain(|seq, p| *seq >= *value || (protect && label::is_fragment(p.label)));
            if map.is_empty() {
                self.packets.remove(pair);
            }
        }

        value.clone()
    }
}

/// Where `put_packet` routed a packet while the lock was held.
enum PutRoute {
    Skipped,
    Stored,
    Terminal,
}

impl MemoryEndpoint {
    /// Create a new empty in-memory endpoint.
    pub fn new(name: EndpointId) -> Self {
        Self {
            name,
            inner: RwLock::new(MemoryEndpointInner::default()),
            handlers: RwLock::new(Vec::new()),
            leaf: AtomicBool::new(true),
        }
    }

    fn handlers_snapshot(&self) -> Vec<Arc<dyn PacketHandler>> {
        self.handlers.read().unwrap().clone()
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn name(&self) -> &EndpointId {
        &self.name
    }

    fn is_leaf(&self) -> bool {
        self.leaf.load(Ordering::Relaxed)
    }

    async fn send_packet(&self, dst: &EndpointId, label: u32, payload: Bytes) -> Result<Packet> {
        let mut inner = self.inner.write().unwrap();
        let pair = SrcDstPair::new(self.name.clone(), dst.clone());
        let seq = inner.next_seq(&pair);
        let packet = Packet {
            src: self.name.clone(),
            dst: dst.clone(),
            seq,
            label,
            payload,
        };
        inner.insert(packet.clone());
        Ok(packet)
    }

    async fn put_packet(&self, packet: &Packet) -> Result<()> {
        let route = {
            let mut inner = self.inner.write().unwrap();
            let pair = SrcDstPair::new(packet.src.clone(), packet.dst.clone());
            let lb = inner.lower_bound(&pair);

            if packet.seq < lb {
                PutRoute::Skipped
            } else if packet.dst == self.name {
                PutRoute::Terminal
            } else {
                inner.store_dedup(packet)?;
                PutRoute::Stored
            }
        };

        match route {
            PutRoute::Skipped | PutRoute::Stored => Ok(()),
            PutRoute::Terminal => {
                self.deliver(packet).await?;
                let next = packet.seq.inc();
                self.update_lower_bound(&packet.src, &packet.dst, Some(&next))
                    .await?;
                Ok(())
            }
        }
    }

    async fn get_packet(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        seq: &Counter,
    ) -> Result<Option<Packet>> {
        let inner = self.inner.read().unwrap();
        let pair = SrcDstPair::new(src.clone(), dst.clone());
        Ok(inner
            .packets
            .get(&pair)
            .and_then(|map| map.get(seq))
            .cloned())
    }

    async fn get_total_packet_count(&self) -> Result<u64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.packets.values().map(|map| map.len() as u64).sum())
    }

    async fn get_src_dst_pairs(&self) -> Result<Vec<SrcDstPair>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .packets
            .iter()
            .filter(|(_, map)| !map.is_empty())
            .map(|(pair, _)| pair.clone())
            .collect())
    }

    async fn get_lower_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
        let inner = self.inner.read().unwrap();
        Ok(inner.lower_bound(&SrcDstPair::new(src.clone(), dst.clone())))
    }

    async fn get_upper_bound(&self, src: &EndpointId, dst: &EndpointId) -> Result<Counter> {
        let inner = self.inner.read().unwrap();
        Ok(inner.upper_bound(&SrcDstPair::new(src.clone(), dst.clone())))
    }

    async fn update_lower_bound(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        value: Option<&Counter>,
    ) -> Result<Counter> {
        let mut inner = self.inner.write().unwrap();
        let pair = SrcDstPair::new(src.clone(), dst.clone());
        Ok(inner.apply_lower_bound(&self.name, &pair, value))
    }

    async fn get_lower_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>> {
        let inner = self.inner.read().unwrap();
        Ok(pairs.iter().map(|pair| inner.lower_bound(pair)).collect())
    }

    async fn get_upper_bounds(&self, pairs: &[SrcDstPair]) -> Result<Vec<Counter>> {
        let inner = self.inner.read().unwrap();
        Ok(pairs.iter().map(|pair| inner.upper_bound(pair)).collect())
    }

    async fn update_lower_bounds(&self, updates: &[BoundUpdate]) -> Result<Vec<Counter>> {
        let mut inner = self.inner.write().unwrap();
        Ok(updates
            .iter()
            .map(|update| {
                inner.apply_lower_bound(&self.name, &update.pair, update.lower_bound.as_ref())
            })
            .collect())
    }
}

#[async_trait]
impl LocalEndpoint for MemoryEndpoint {
    fn add_packet_handler(&self, handler: Arc<dyn PacketHandler>) {
        self.handlers.write().unwrap().push(handler);
    }

    fn set_leaf(&self, leaf: bool) {
        self.leaf.store(leaf, Ordering::Relaxed);
    }

    async fn deliver(&self, packet: &Packet) -> Result<()> {
        for handler in self.handlers_snapshot() {
            handler.on_packet(self, packet).await?;
        }
        Ok(())
    }

    async fn send_packet_batch(
        &self,
        count: usize,
        generator: Arc<BatchFn>,
    ) -> Result<Vec<Packet>> {
        let mut inner = self.inner.write().unwrap();
        let mut sent: Vec<Packet> = Vec::with_capacity(count);
        for i in 0..count {
            let item = generator(&sent, i);
            let pair = SrcDstPair::new(self.name.clone(), item.dst.clone());
            let seq = inner.next_seq(&pair);
            let packet = Packet {
                src: self.name.clone(),
                dst: item.dst,
                seq,
                label: item.label,
                payload: item.payload,
            };
            inner.insert(packet.clone());
            sent.push(packet);
        }
        Ok(sent)
    }

    async fn stash_packet(&self, packet: &Packet) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.store_dedup(packet)
    }

    async fn count_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<u64> {
        let packets = self.packets_in_range(src, dst, after, upto, label).await?;
        Ok(packets.len() as u64)
    }

    async fn packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        after: &Counter,
        upto: &Counter,
        label: u32,
    ) -> Result<Vec<Packet>> {
        use std::ops::Bound;

        let inner = self.inner.read().unwrap();
        let pair = SrcDstPair::new(src.clone(), dst.clone());
        let Some(map) = inner.packets.get(&pair) else {
            return Ok(Vec::new());
        };
        Ok(map
            .range((Bound::Excluded(after.clone()), Bound::Included(upto.clone())))
            .filter(|(_, p)| p.label == label)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn remove_packets_in_range(
        &self,
        src: &EndpointId,
        dst: &EndpointId,
        from: &Counter,
        to: &Counter,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let pair = SrcDstPair::new(src.clone(), dst.clone());
        if let Some(map) = inner.packets.get_mut(&pair) {
            map.retain(|seq, _| *seq < *from || *seq > *to);
            if map.is_empty() {
                inner.packets.remove(&pair);
            }
        }
        Ok(())
    }

    async fn touch_fragment_group(
        &self,
        src: &EndpointId,
        group: &Counter,
        last_seq: &Counter,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner
            .fragment_groups
            .entry((src.clone(), group.clone()))
            .or_insert_with(|| (last_seq.clone(), 0));
        if *last_seq > entry.0 {
            entry.0 = last_seq.clone();
        }
        entry.1 = now_millis();
        Ok(())
    }

    async fn clear_fragment_group(&self, src: &EndpointId, group: &Counter) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.fragment_groups.remove(&(src.clone(), group.clone()));
        Ok(())
    }

    async fn stale_fragment_groups(&self, cutoff_ms: u64) -> Result<Vec<FragmentGroup>> {
        let inner = self.inner.read().unwrap();
        let mut groups: Vec<FragmentGroup> = inner
            .fragment_groups
            .iter()
            .filter(|(_, (_, updated_at))| *updated_at < cutoff_ms)
            .map(|((src, group), (last_seq, updated_at))| FragmentGroup {
                src: src.clone(),
                dst: self.name.clone(),
                group: group.clone(),
                last_seq: last_seq.clone(),
                updated_at: *updated_at,
            })
            .collect();
        groups.sort_by_key(|g| g.updated_at);
        Ok(groups)
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        *inner = MemoryEndpointInner::default();
        Ok(())
    }

    async fn state_summary(&self) -> Result<StateSummary> {
        let inner = self.inner.read().unwrap();

        let mut pairs: Vec<SrcDstPair> = inner
            .packets
            .iter()
            .filter(|(_, map)| !map.is_empty())
            .map(|(pair, _)| pair.clone())
            .chain(inner.lower_bounds.keys().cloned())
            .collect();
        pairs.sort();
        pairs.dedup();

        let summaries = pairs
            .into_iter()
            .map(|pair| {
                let lower_bound = inner.lower_bound(&pair);
                let upper_bound = inner.upper_bound(&pair);
                let stored = inner
                    .packets
                    .get(&pair)
                    .map(|map| map.len() as u64)
                    .unwrap_or(0);
                PairSummary { pair, lower_bound, upper_bound, stored }
            })
            .collect();

        Ok(StateSummary {
            name: self.name.to_string(),
            is_leaf: self.is_leaf(),
            total_packets: inner.packets.values().map(|map| map.len() as u64).sum(),
            pairs: summaries,
        })
    }
}

fn now_millis() -> u64 {
    relaykit_core::now_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s).unwrap()
    }

    fn relay_packet(src: &str, dst: &str, seq: u64, payload: &[u8]) -> Packet {
        Packet {
            src: id(src),
            dst: id(dst),
            seq: Counter::from_number(seq, COUNTER_WIDTH),
            label: 1,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    struct Recorder {
        seen: std::sync::Mutex<Vec<Packet>>,
    }

    #[async_trait]
    impl PacketHandler for Recorder {
        async fn on_packet(&self, _cx: &dyn LocalEndpoint, packet: &Packet) -> Result<()> {
            self.seen.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_then_get() {
        let ep = MemoryEndpoint::new(id("a"));
        let sent = ep.send_packet(&id("b"), 3, Bytes::from_static(b"hi")).await.unwrap();

        let got = ep
            .get_packet(&id("a"), &id("b"), &sent.seq)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, sent);

        let next = ep.send_packet(&id("b"), 3, Bytes::from_static(b"again")).await.unwrap();
        assert_eq!(next.seq, sent.seq.inc());
    }

    #[tokio::test]
    async fn test_relay_dedup_and_conflict() {
        let ep = MemoryEndpoint::new(id("relay"));
        let p = relay_packet("a", "b", 10, b"payload");

        ep.put_packet(&p).await.unwrap();
        ep.put_packet(&p).await.unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 1);

        let mut altered = p.clone();
        altered.payload = Bytes::from_static(b"other");
        assert!(matches!(
            ep.put_packet(&altered).await.unwrap_err(),
            StoreError::PacketConflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_terminal_delivery_raises_watermark() {
        let ep = MemoryEndpoint::new(id("b"));
        let recorder = Arc::new(Recorder { seen: std::sync::Mutex::new(Vec::new()) });
        ep.add_packet_handler(recorder.clone());

        let p = relay_packet("a", "b", 10, b"hello");
        ep.put_packet(&p).await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![p.clone()]);
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 0);
        assert_eq!(
            ep.get_lower_bound(&id("a"), &id("b")).await.unwrap(),
            p.seq.inc()
        );
    }

    #[tokio::test]
    async fn test_watermark_protects_fragments_at_destination() {
        let ep = MemoryEndpoint::new(id("b"));
        let mut frag = relay_packet("a", "b", 10, b"chunk");
        frag.label = label::FRAGMENT_REST;
        let plain = relay_packet("a", "b", 11, b"plain");

        ep.stash_packet(&frag).await.unwrap();
        ep.stash_packet(&plain).await.unwrap();

        let high = Counter::from_number(20, COUNTER_WIDTH);
        ep.update_lower_bound(&id("a"), &id("b"), Some(&high)).await.unwrap();

        assert!(ep.get_packet(&id("a"), &id("b"), &frag.seq).await.unwrap().is_some());
        assert!(ep.get_packet(&id("a"), &id("b"), &plain.seq).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_queries_filter_by_label() {
        let ep = MemoryEndpoint::new(id("relay"));
        for seq in 1..=5u64 {
            let mut p = relay_packet("a", "b", seq, b"x");
            p.label = if seq % 2 == 0 { 7 } else { 8 };
            ep.put_packet(&p).await.unwrap();
        }

        let after = Counter::from_number(1, COUNTER_WIDTH);
        let upto = Counter::from_number(5, COUNTER_WIDTH);
        let sevens = ep
            .packets_in_range(&id("a"), &id("b"), &after, &upto, 7)
            .await
            .unwrap();
        assert_eq!(sevens.len(), 2);
        assert!(sevens.windows(2).all(|w| w[0].seq < w[1].seq));

        assert_eq!(
            ep.count_packets_in_range(&id("a"), &id("b"), &after, &upto, 8)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_pairs_listed_in_order() {
        let ep = MemoryEndpoint::new(id("relay"));
        ep.put_packet(&relay_packet("c", "d", 1, b"x")).await.unwrap();
        ep.put_packet(&relay_packet("a", "b", 1, b"x")).await.unwrap();

        let pairs = ep.get_src_dst_pairs().await.unwrap();
        assert_eq!(
            pairs,
            vec![
                SrcDstPair::new(id("a"), id("b")),
                SrcDstPair::new(id("c"), id("d")),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset() {
        let ep = MemoryEndpoint::new(id("a"));
        ep.send_packet(&id("b"), 1, Bytes::from_static(b"x")).await.unwrap();
        ep.reset().await.unwrap();
        assert_eq!(ep.get_total_packet_count().await.unwrap(), 0);
    }
}
