//! The synchronization engine.
//!
//! One run works on any two [`Endpoint`] implementations, local or remote.
//! It merges the pair watermarks in three passes, plans one job per pair
//! with a history imbalance, and executes the jobs sequentially. Every
//! step is idempotent, so an interrupted run resumes from the persisted
//! watermarks on the next attempt.

use relaykit_core::{filter_by_name, pair_union};
use relaykit_store::{BoundUpdate, Endpoint};

use crate::error::{Result, SyncError};
use crate::plan::{plan_job, Direction, SyncJob};

/// Knobs for one synchronization run.
#[derive(Default)]
pub struct SyncOptions {
    /// Invoked after each successfully transferred packet with
    /// (transferred, planned).
    pub progress: Option<Box<dyn Fn(u64, u64) + Send + Sync>>,
}

/// What a synchronization run accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pairs_considered: usize,
    pub jobs_planned: usize,
    pub packets_planned: u64,
    pub packets_transferred: u64,
}

/// Converge two endpoints.
///
/// Watermarks merge first, so both sides agree on what is already
/// delivered before any packet moves; packets below the merged bound are
/// garbage-collected by the stores themselves. Leaf endpoints only take
/// part in pairs touching their own name.
///
/// The first failing job aborts the run; the error wraps a report of the
/// work finished up to that point.
pub async fn synchronize<A, B>(a: &A, b: &B, options: &SyncOptions) -> Result<SyncReport>
where
    A: Endpoint + ?Sized,
    B: Endpoint + ?Sized,
{
    if a.name() == b.name() {
        return Err(SyncError::SameEndpoint(a.name().to_string()));
    }

    let mut pairs = pair_union(&a.get_src_dst_pairs().await?, &b.get_src_dst_pairs().await?);
    if a.is_leaf() {
        pairs = filter_by_name(pairs, a.name());
    }
    if b.is_leaf() {
        pairs = filter_by_name(pairs, b.name());
    }

    // Watermark merge. Pass 1 reads A without writing, pass 2 folds A's
    // bounds into B, pass 3 folds B's effective bounds back into A. The
    // pass 3 results are the merged bounds both sides now hold.
    let reads: Vec<BoundUpdate> = pairs.iter().cloned().map(BoundUpdate::read).collect();
    let a_bounds = a.update_lower_bounds(&reads).await?;
    let raises: Vec<BoundUpdate> = pairs
        .iter()
        .zip(&a_bounds)
        .map(|(pair, lb)| BoundUpdate::raise(pair.clone(), lb.clone()))
        .collect();
    let b_bounds = b.update_lower_bounds(&raises).await?;
    let raises: Vec<BoundUpdate> = pairs
        .iter()
        .zip(&b_bounds)
        .map(|(pair, lb)| BoundUpdate::raise(pair.clone(), lb.clone()))
        .collect();
    let merged = a.update_lower_bounds(&raises).await?;

    let ub_a = a.get_upper_bounds(&pairs).await?;
    let ub_b = b.get_upper_bounds(&pairs).await?;
    if merged.len() != pairs.len() || ub_a.len() != pairs.len() || ub_b.len() != pairs.len() {
        return Err(SyncError::Protocol(format!(
            "bound list length mismatch for {} pairs",
            pairs.len()
        )));
    }

    let mut jobs: Vec<SyncJob> = Vec::new();
    for i in 0..pairs.len() {
        let job = plan_job(&pairs[i], &merged[i], &ub_a[i], &ub_b[i]);
        if job.is_empty() {
            continue;
        }
        // A store never receives copies of packets it originated.
        if job.receiver(a.name(), b.name()) == &job.pair.src {
            continue;
        }
        jobs.push(job);
    }

    let mut report = SyncReport {
        pairs_considered: pairs.len(),
        jobs_planned: jobs.len(),
        packets_planned: jobs.iter().map(SyncJob::span).sum(),
        packets_transferred: 0,
    };

    for job in &jobs {
        let result = match job.direction {
            Direction::AToB => run_job(a, b, job, &mut report, options).await,
            Direction::BToA => run_job(b, a, job, &mut report, options).await,
        };
        if let Err(source) = result {
            return Err(SyncError::Aborted {
                report,
                source: Box::new(source),
            });
        }
    }

    if report.packets_transferred > 0 {
        tracing::info!(
            "synchronized {} of {} packets between {} and {}",
            report.packets_transferred,
            report.packets_planned,
            a.name(),
            b.name()
        );
    }
    Ok(report)
}

/// Move one job's packets from `from` to `to`, counter by counter.
async fn run_job<F, T>(
    from: &F,
    to: &T,
    job: &SyncJob,
    report: &mut SyncReport,
    options: &SyncOptions,
) -> Result<()>
where
    F: Endpoint + ?Sized,
    T: Endpoint + ?Sized,
{
    tracing::debug!(
        "transferring {} -> {} range [{}, {}) toward {}",
        job.pair.src,
        job.pair.dst,
        job.from,
        job.to,
        to.name()
    );

    let mut seq = job.from.clone();
    while seq < job.to {
        let packet = from
            .get_packet(&job.pair.src, &job.pair.dst, &seq)
            .await?
            .ok_or_else(|| SyncError::MissingPacket {
                holder: from.name().to_string(),
                src: job.pair.src.to_string(),
                dst: job.pair.dst.to_string(),
                seq: seq.to_string(),
            })?;
        to.put_packet(&packet).await?;
        report.packets_transferred += 1;
        if let Some(progress) = &options.progress {
            progress(report.packets_transferred, report.packets_planned);
        }
        seq = seq.inc();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use relaykit_core::{Counter, EndpointId, Packet, COUNTER_WIDTH};
    use relaykit_store::{LocalEndpoint, MemoryEndpoint, PacketHandler};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s).unwrap()
    }

    fn n(v: u64) -> Counter {
        Counter::from_number(v, COUNTER_WIDTH)
    }

    fn relay(name: &str) -> MemoryEndpoint {
        let ep = MemoryEndpoint::new(id(name));
        ep.set_leaf(false);
        ep
    }

    fn packet(src: &str, dst: &str, seq: u64) -> Packet {
        Packet {
            src: id(src),
            dst: id(dst),
            seq: n(seq),
            label: 1,
            payload: Bytes::from(format!("payload {seq}")),
        }
    }

    struct Collect {
        seen: Mutex<Vec<Packet>>,
    }

    impl Collect {
        fn new() -> Arc<Self> {
            Arc::new(Collect { seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl PacketHandler for Collect {
        async fn on_packet(
            &self,
            _cx: &dyn LocalEndpoint,
            packet: &Packet,
        ) -> relaykit_store::Result<()> {
            self.seen.lock().unwrap().push(packet.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transfers_pending_packets() {
        let a = MemoryEndpoint::new(id("a"));
        let b = relay("b");
        for _ in 0..5 {
            a.send_packet(&id("c"), 1, Bytes::from_static(b"x")).await.unwrap();
        }

        let report = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.packets_transferred, 5);
        assert_eq!(report.packets_planned, 5);
        assert_eq!(b.get_total_packet_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let a = MemoryEndpoint::new(id("a"));
        let b = relay("b");
        for _ in 0..3 {
            a.send_packet(&id("c"), 1, Bytes::from_static(b"x")).await.unwrap();
        }

        synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        let again = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        assert_eq!(again.packets_transferred, 0);
        assert_eq!(again.jobs_planned, 0);
        assert_eq!(b.get_total_packet_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_same_name_is_rejected() {
        let a = MemoryEndpoint::new(id("a"));
        let b = MemoryEndpoint::new(id("a"));
        let err = synchronize(&a, &b, &SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::SameEndpoint(_)));
    }

    #[tokio::test]
    async fn test_terminal_delivery_then_watermark_returns() {
        let b = relay("b");
        for seq in 1..=4u64 {
            b.put_packet(&packet("a", "c", seq)).await.unwrap();
        }
        let c = MemoryEndpoint::new(id("c"));
        let collect = Collect::new();
        c.add_packet_handler(collect.clone());

        let report = synchronize(&b, &c, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.packets_transferred, 4);
        assert_eq!(collect.seen.lock().unwrap().len(), 4);
        // Terminal packets are retired at the destination store.
        assert_eq!(c.get_total_packet_count().await.unwrap(), 0);

        // The raised watermark flows back on the next run and the relay
        // reclaims its copies.
        let report = synchronize(&b, &c, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.packets_transferred, 0);
        assert_eq!(b.get_total_packet_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_leaf_skips_foreign_pairs() {
        let b = relay("b");
        for seq in 1..=3u64 {
            b.put_packet(&packet("x", "y", seq)).await.unwrap();
        }

        // A leaf only trades pairs touching its own name.
        let a = MemoryEndpoint::new(id("a"));
        let report = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.pairs_considered, 0);
        assert_eq!(a.get_total_packet_count().await.unwrap(), 0);

        // The same store as a relay picks the pair up.
        a.set_leaf(false);
        let report = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.packets_transferred, 3);
        assert_eq!(a.get_total_packet_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_source_never_receives_its_own_packets_back() {
        let a = MemoryEndpoint::new(id("a"));
        a.set_leaf(false);
        let b = relay("b");
        for seq in 10..=12u64 {
            b.put_packet(&packet("a", "c", seq)).await.unwrap();
        }

        let report = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        assert_eq!(report.packets_transferred, 0);
        assert_eq!(a.get_total_packet_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transfer_starts_at_smaller_upper_bound() {
        let a = relay("r1");
        let b = relay("r2");
        for seq in 1..=5u64 {
            a.put_packet(&packet("x", "y", seq)).await.unwrap();
        }
        for seq in 1..=3u64 {
            b.put_packet(&packet("x", "y", seq)).await.unwrap();
        }

        let report = synchronize(&a, &b, &SyncOptions::default()).await.unwrap();
        // Only the two packets beyond b's history move.
        assert_eq!(report.packets_transferred, 2);
        assert_eq!(b.get_total_packet_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_packet_aborts_with_partial_report() {
        let a = relay("r1");
        let b = relay("r2");
        for seq in 1..=5u64 {
            a.put_packet(&packet("x", "y", seq)).await.unwrap();
        }
        // Tear a hole in the middle of the range.
        a.remove_packets_in_range(&id("x"), &id("y"), &n(3), &n(3)).await.unwrap();

        let err = synchronize(&a, &b, &SyncOptions::default()).await.unwrap_err();
        match err {
            SyncError::Aborted { report, source } => {
                assert_eq!(report.packets_transferred, 2);
                assert!(matches!(*source, SyncError::MissingPacket { .. }));
            }
            other => panic!("expected Aborted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_progress_reports_each_packet() {
        let a = MemoryEndpoint::new(id("a"));
        let b = relay("b");
        for _ in 0..4 {
            a.send_packet(&id("c"), 1, Bytes::from_static(b"x")).await.unwrap();
        }

        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        let last = Arc::new(Mutex::new((0u64, 0u64)));
        let last2 = last.clone();
        let options = SyncOptions {
            progress: Some(Box::new(move |done, total| {
                calls2.fetch_add(1, Ordering::SeqCst);
                *last2.lock().unwrap() = (done, total);
            })),
        };

        synchronize(&a, &b, &options).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*last.lock().unwrap(), (4, 4));
    }
}
