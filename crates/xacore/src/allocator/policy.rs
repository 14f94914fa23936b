use std::cmp::Reverse;

use crate::common::ids::ResourceUnitId;
use crate::config::SharePolicyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub unit: ResourceUnitId,
    /// Number of group members that already hold the unit
    pub holders: usize,
}

/// Orders the candidate units of one resource kind for a sharing group member.
/// Candidates arrive in topology order.
pub trait SharePolicy: Send + Sync {
    fn order(&self, member_index: usize, candidates: &mut Vec<Candidate>);
}

/// Stacks members onto units the group already holds, most shared first.
pub struct Packed;

impl SharePolicy for Packed {
    fn order(&self, _member_index: usize, candidates: &mut Vec<Candidate>) {
        candidates.sort_by_key(|c| Reverse(c.holders));
    }
}

/// Rotates the starting unit for every member, spreading the group.
pub struct RoundRobin;

impl SharePolicy for RoundRobin {
    fn order(&self, member_index: usize, candidates: &mut Vec<Candidate>) {
        if !candidates.is_empty() {
            let offset = member_index % candidates.len();
            candidates.rotate_left(offset);
        }
    }
}

pub fn create_share_policy(kind: SharePolicyKind) -> Box<dyn SharePolicy> {
    match kind {
        SharePolicyKind::Packed => Box::new(Packed),
        SharePolicyKind::RoundRobin => Box::new(RoundRobin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(holders: &[usize]) -> Vec<Candidate> {
        holders
            .iter()
            .enumerate()
            .map(|(i, h)| Candidate {
                unit: ResourceUnitId::new(i as u32),
                holders: *h,
            })
            .collect()
    }

    fn units(candidates: &[Candidate]) -> Vec<u32> {
        candidates.iter().map(|c| c.unit.as_num()).collect()
    }

    #[test]
    fn test_packed_prefers_most_shared() {
        let mut c = candidates(&[0, 2, 0, 1]);
        Packed.order(3, &mut c);
        assert_eq!(units(&c), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_round_robin_rotates() {
        let mut c = candidates(&[0, 0, 0]);
        RoundRobin.order(4, &mut c);
        assert_eq!(units(&c), vec![1, 2, 0]);

        let mut empty = Vec::new();
        RoundRobin.order(1, &mut empty);
        assert!(empty.is_empty());
    }
}
