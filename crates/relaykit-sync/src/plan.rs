//! Planning which packets move where.
//!
//! A synchronization run turns watermark state into a list of [`SyncJob`]s,
//! one per pair with a history imbalance. Planning is pure; the engine
//! executes the jobs.

use relaykit_core::{Counter, EndpointId, SrcDstPair};

/// Which side of the synchronization receives packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `a` has more history; packets flow a -> b.
    AToB,
    /// `b` has more history; packets flow b -> a.
    BToA,
}

/// One unit of transfer work: move the pair's packets in [`from`, `to`)
/// toward the side that lags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub pair: SrcDstPair,
    pub direction: Direction,
    /// First counter to transfer.
    pub from: Counter,
    /// One past the last counter to transfer.
    pub to: Counter,
}

impl SyncJob {
    /// Number of packets the job will move.
    pub fn span(&self) -> u64 {
        self.to.diff(&self.from).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Name of the side that receives packets under this job.
    pub fn receiver<'a>(&self, a_name: &'a EndpointId, b_name: &'a EndpointId) -> &'a EndpointId {
        match self.direction {
            Direction::AToB => b_name,
            Direction::BToA => a_name,
        }
    }
}

/// Build the job for one pair from the merged lower bound and both sides'
/// upper bounds.
///
/// Packets flow from the side with the larger upper bound. The transfer
/// starts at the smaller upper bound, where the lagging side's history
/// ends; when either side has never seen the pair at all (its upper bound
/// is zero) the transfer starts at the merged lower bound instead.
pub fn plan_job(pair: &SrcDstPair, lower_bound: &Counter, ub_a: &Counter, ub_b: &Counter) -> SyncJob {
    let from = if ub_a.is_zero() || ub_b.is_zero() {
        lower_bound.clone()
    } else {
        ub_a.min(ub_b).clone()
    };
    if ub_a < ub_b {
        SyncJob {
            pair: pair.clone(),
            direction: Direction::BToA,
            from,
            to: ub_b.clone(),
        }
    } else {
        SyncJob {
            pair: pair.clone(),
            direction: Direction::AToB,
            from,
            to: ub_a.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaykit_core::COUNTER_WIDTH;

    fn id(s: &str) -> EndpointId {
        EndpointId::new(s).unwrap()
    }

    fn n(v: u64) -> Counter {
        Counter::from_number(v, COUNTER_WIDTH)
    }

    fn pair() -> SrcDstPair {
        SrcDstPair::new(id("x"), id("y"))
    }

    #[test]
    fn test_ahead_side_sends() {
        let job = plan_job(&pair(), &n(3), &n(10), &n(6));
        assert_eq!(job.direction, Direction::AToB);
        assert_eq!(job.from, n(6));
        assert_eq!(job.to, n(10));
        assert_eq!(job.span(), 4);
        assert!(!job.is_empty());

        let job = plan_job(&pair(), &n(3), &n(6), &n(10));
        assert_eq!(job.direction, Direction::BToA);
        assert_eq!(job.from, n(6));
        assert_eq!(job.to, n(10));
    }

    #[test]
    fn test_equal_upper_bounds_is_empty() {
        let job = plan_job(&pair(), &n(3), &n(10), &n(10));
        assert!(job.is_empty());
        assert_eq!(job.span(), 0);
    }

    #[test]
    fn test_zero_upper_bound_starts_at_lower_bound() {
        let job = plan_job(&pair(), &n(0), &Counter::zero(COUNTER_WIDTH), &n(10));
        assert_eq!(job.direction, Direction::BToA);
        assert_eq!(job.from, n(0));
        assert_eq!(job.to, n(10));
        assert_eq!(job.span(), 10);
    }

    #[test]
    fn test_receiver_follows_direction() {
        let a = id("a");
        let b = id("b");
        let job = plan_job(&pair(), &n(0), &n(5), &n(2));
        assert_eq!(job.receiver(&a, &b), &b);
        let job = plan_job(&pair(), &n(0), &n(2), &n(5));
        assert_eq!(job.receiver(&a, &b), &a);
    }
}
