//! (source, destination) pair algebra used by the synchronization engine.

use serde::{Deserialize, Serialize};

use crate::packet::EndpointId;

/// One direction of traffic between two named stores.
///
/// Ordering is by source then destination, matching the order the store
/// returns pairs in, so sorted lists can be merged directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SrcDstPair {
    pub src: EndpointId,
    pub dst: EndpointId,
}

impl SrcDstPair {
    pub fn new(src: EndpointId, dst: EndpointId) -> Self {
        SrcDstPair { src, dst }
    }

    /// Whether either end of the pair is `name`.
    pub fn touches(&self, name: &EndpointId) -> bool {
        self.src == *name || self.dst == *name
    }
}

/// Merge two sorted pair lists into their sorted union.
pub fn pair_union(a: &[SrcDstPair], b: &[SrcDstPair]) -> Vec<SrcDstPair> {
    debug_assert!(a.windows(2).all(|w| w[0] < w[1]));
    debug_assert!(b.windows(2).all(|w| w[0] < w[1]));
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j].clone());
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Keep only pairs that touch `name`. Leaf stores do not relay, so during
/// synchronization they only care about traffic to or from themselves.
pub fn filter_by_name(pairs: Vec<SrcDstPair>, name: &EndpointId) -> Vec<SrcDstPair> {
    pairs.into_iter().filter(|p| p.touches(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(src: &str, dst: &str) -> SrcDstPair {
        SrcDstPair::new(
            EndpointId::new(src).unwrap(),
            EndpointId::new(dst).unwrap(),
        )
    }

    #[test]
    fn test_ordering_by_src_then_dst() {
        assert!(pair("a", "b") < pair("a", "c"));
        assert!(pair("a", "z") < pair("b", "a"));
    }

    #[test]
    fn test_union_merges_and_dedups() {
        let a = vec![pair("a", "b"), pair("a", "c"), pair("c", "a")];
        let b = vec![pair("a", "c"), pair("b", "a")];
        let u = pair_union(&a, &b);
        assert_eq!(
            u,
            vec![pair("a", "b"), pair("a", "c"), pair("b", "a"), pair("c", "a")]
        );
    }

    #[test]
    fn test_union_with_empty() {
        let a = vec![pair("a", "b")];
        assert_eq!(pair_union(&a, &[]), a);
        assert_eq!(pair_union(&[], &a), a);
    }

    #[test]
    fn test_filter_by_name_keeps_touching_pairs() {
        let name = EndpointId::new("b").unwrap();
        let pairs = vec![pair("a", "b"), pair("a", "c"), pair("b", "c")];
        assert_eq!(
            filter_by_name(pairs, &name),
            vec![pair("a", "b"), pair("b", "c")]
        );
    }
}
