//! Subnet pool
//!
//! The pool carves a fixed super-block (10.0.0.0/8 by default) into blocks of
//! one granularity (/16 by default) and keeps two disjoint sets:
//!
//! - `used`: local CIDRs plus every block handed to, or kept by, a peer
//! - `free`: partition blocks that overlap nothing in `used`
//!
//! A partition block that overlaps a `used` entry is retired from `free`
//! instead of being copied into `used`, so `used` stays pairwise
//! non-overlapping. Retired blocks come back when the covering entry is
//! released.
//!
//! Every operation is linear in the number of blocks, which is bounded by the
//! partition size (256 for a /8 carved at /16).

use crate::error::IpamError;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Largest partition accepted (granularity at most 16 bits below the super-block).
const MAX_PARTITION_BITS: u8 = 16;

/// Parses an IPv4 CIDR, truncating host bits (`10.0.5.1/24` -> `10.0.5.0/24`).
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Net, IpamError> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|_| IpamError::InvalidCidr(cidr.to_string()))
}

/// True when the two networks share at least one address.
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Allocator of non-overlapping IPv4 blocks.
///
/// Pure state: no I/O and no locking. Use [`crate::SharedSubnetPool`] to share
/// it between reconciles.
#[derive(Debug, Clone)]
pub struct SubnetPool {
    super_block: Ipv4Net,
    granularity: u8,
    blocks: Vec<Ipv4Net>,
    free: BTreeSet<Ipv4Net>,
    used: BTreeSet<Ipv4Net>,
}

impl SubnetPool {
    /// Partitions `super_block` into `/granularity` blocks, all initially free.
    pub fn new(super_block: Ipv4Net, granularity: u8) -> Result<Self, IpamError> {
        let super_block = super_block.trunc();
        let invalid = || IpamError::InvalidGranularity {
            super_block: super_block.to_string(),
            granularity,
        };
        if granularity < super_block.prefix_len()
            || granularity - super_block.prefix_len() > MAX_PARTITION_BITS
        {
            return Err(invalid());
        }
        let blocks: Vec<Ipv4Net> = super_block.subnets(granularity).map_err(|_| invalid())?.collect();
        debug!("Partitioned {} into {} /{} blocks", super_block, blocks.len(), granularity);

        Ok(Self {
            super_block,
            granularity,
            free: blocks.iter().copied().collect(),
            blocks,
            used: BTreeSet::new(),
        })
    }

    /// Reserves the local cluster's own CIDRs (pod and service networks).
    ///
    /// Every partition block overlapping one of them leaves `free`.
    pub fn seed(&mut self, local_cidrs: &[Ipv4Net]) -> Result<(), IpamError> {
        for (i, a) in local_cidrs.iter().enumerate() {
            for b in &local_cidrs[i + 1..] {
                if a.trunc() != b.trunc() && overlaps(a, b) {
                    return Err(IpamError::OverlappingLocalCidrs(a.to_string(), b.to_string()));
                }
            }
        }
        for cidr in local_cidrs {
            self.used.insert(cidr.trunc());
        }
        self.retire_conflicting_free();
        info!(
            "Seeded subnet pool {} with local CIDRs {:?}: {} free, {} used",
            self.super_block,
            local_cidrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
            self.free.len(),
            self.used.len()
        );
        Ok(())
    }

    /// Resolves `candidate` against the used set.
    ///
    /// Returns `(candidate, false)` when it overlaps nothing in use, otherwise
    /// a free block and `true`. Which free block is returned is unspecified.
    /// Does not mutate the pool; pair it with [`SubnetPool::commit`].
    pub fn check_conflict(&self, candidate: Ipv4Net) -> Result<(Ipv4Net, bool), IpamError> {
        let candidate = candidate.trunc();
        if !self.conflicts(&candidate) {
            return Ok((candidate, false));
        }
        match self.free.iter().next() {
            Some(block) => {
                debug!("{} conflicts with a used subnet, proposing {}", candidate, block);
                Ok((*block, true))
            }
            None => Err(IpamError::NoFreeSubnets(candidate.to_string())),
        }
    }

    /// Marks `block` as used and retires every free block it now overlaps.
    pub fn commit(&mut self, block: Ipv4Net) {
        let block = block.trunc();
        self.free.remove(&block);
        self.used.insert(block);
        self.retire_conflicting_free();
        debug!("Committed {}: {} free, {} used", block, self.free.len(), self.used.len());
    }

    /// Commits `block` only if it overlaps nothing in use.
    ///
    /// Used when rebuilding state from persisted endpoints. Returns false when
    /// the block was skipped.
    pub fn reserve(&mut self, block: Ipv4Net) -> bool {
        let block = block.trunc();
        if self.used.contains(&block) {
            return true;
        }
        if self.conflicts(&block) {
            warn!("Not reserving {}: it overlaps a used subnet", block);
            return false;
        }
        self.commit(block);
        true
    }

    /// Removes `block` from `used` and returns reclaimable partition blocks to `free`.
    ///
    /// Returns false when the block was not in use.
    pub fn release(&mut self, block: Ipv4Net) -> bool {
        let block = block.trunc();
        if !self.used.remove(&block) {
            return false;
        }
        let reclaimed: Vec<Ipv4Net> = self
            .blocks
            .iter()
            .filter(|b| !self.free.contains(*b) && !self.conflicts(b))
            .copied()
            .collect();
        self.free.extend(reclaimed.iter().copied());
        debug!("Released {}, reclaimed {} blocks", block, reclaimed.len());
        true
    }

    /// True when `net` overlaps any used entry.
    pub fn conflicts(&self, net: &Ipv4Net) -> bool {
        self.used.iter().any(|u| overlaps(u, net))
    }

    /// True when `net` is itself an entry of the used set.
    pub fn is_used(&self, net: &Ipv4Net) -> bool {
        self.used.contains(&net.trunc())
    }

    /// Free partition blocks in address order.
    pub fn free(&self) -> impl Iterator<Item = &Ipv4Net> {
        self.free.iter()
    }

    /// Used entries, local CIDRs included.
    pub fn used(&self) -> impl Iterator<Item = &Ipv4Net> {
        self.used.iter()
    }

    /// Number of free blocks.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of used entries.
    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// The block remapped subnets are carved from.
    pub fn super_block(&self) -> Ipv4Net {
        self.super_block
    }

    /// Prefix length of each partition block.
    pub fn granularity(&self) -> u8 {
        self.granularity
    }

    fn retire_conflicting_free(&mut self) {
        let used = &self.used;
        self.free.retain(|b| !used.iter().any(|u| overlaps(u, b)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        parse_cidr(s).unwrap()
    }

    fn default_pool() -> SubnetPool {
        let mut pool = SubnetPool::new(net("10.0.0.0/8"), 16).unwrap();
        pool.seed(&[net("10.244.0.0/16"), net("10.96.0.0/12")]).unwrap();
        pool
    }

    /// No overlap inside `used`, inside `free`, or between the two.
    fn assert_disjoint(pool: &SubnetPool) {
        let used: Vec<_> = pool.used().copied().collect();
        let free: Vec<_> = pool.free().copied().collect();
        for (i, a) in used.iter().enumerate() {
            for b in &used[i + 1..] {
                assert!(!overlaps(a, b), "used blocks {} and {} overlap", a, b);
            }
        }
        for (i, a) in free.iter().enumerate() {
            for b in &free[i + 1..] {
                assert!(!overlaps(a, b), "free blocks {} and {} overlap", a, b);
            }
            for u in &used {
                assert!(!overlaps(a, u), "free block {} overlaps used {}", a, u);
            }
        }
    }

    #[test]
    fn test_parse_cidr_truncates_host_bits() {
        assert_eq!(net("10.0.5.1/24"), net("10.0.5.0/24"));
        assert!(matches!(parse_cidr("not-a-cidr"), Err(IpamError::InvalidCidr(_))));
        assert!(matches!(parse_cidr("fd00::/64"), Err(IpamError::InvalidCidr(_))));
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps(&net("10.0.0.0/16"), &net("10.0.5.0/24")));
        assert!(overlaps(&net("10.0.5.0/24"), &net("10.0.0.0/16")));
        assert!(!overlaps(&net("10.0.0.0/16"), &net("10.1.0.0/16")));
    }

    #[test]
    fn test_new_partitions_super_block() {
        let pool = SubnetPool::new(net("10.0.0.0/8"), 16).unwrap();
        assert_eq!(pool.free_count(), 256);
        assert_eq!(pool.used_count(), 0);
        assert_eq!(pool.free().next(), Some(&net("10.0.0.0/16")));
    }

    #[test]
    fn test_new_rejects_bad_granularity() {
        assert!(SubnetPool::new(net("10.0.0.0/16"), 8).is_err());
        assert!(SubnetPool::new(net("10.0.0.0/8"), 30).is_err());
    }

    #[test]
    fn test_seed_retires_blocks_covering_local_cidrs() {
        let pool = default_pool();
        // 10.96.0.0/12 covers 16 blocks, 10.244.0.0/16 one more
        assert_eq!(pool.free_count(), 256 - 17);
        assert_eq!(pool.used_count(), 2);
        assert!(!pool.free().any(|b| *b == net("10.244.0.0/16")));
        assert!(!pool.free().any(|b| *b == net("10.100.0.0/16")));
        assert_disjoint(&pool);
    }

    #[test]
    fn test_seed_rejects_overlapping_local_cidrs() {
        let mut pool = SubnetPool::new(net("10.0.0.0/8"), 16).unwrap();
        let result = pool.seed(&[net("10.96.0.0/12"), net("10.100.0.0/16")]);
        assert!(matches!(result, Err(IpamError::OverlappingLocalCidrs(_, _))));
    }

    #[test]
    fn test_check_conflict_keeps_non_overlapping_candidate() {
        let pool = default_pool();
        let (block, remapped) = pool.check_conflict(net("192.168.0.0/16")).unwrap();
        assert_eq!(block, net("192.168.0.0/16"));
        assert!(!remapped);
    }

    #[test]
    fn test_conflicting_candidate_is_remapped_to_free_block() {
        let mut pool = default_pool();
        pool.commit(net("10.0.5.0/24"));

        let (block, remapped) = pool.check_conflict(net("10.0.5.0/24")).unwrap();
        assert!(remapped);
        assert_ne!(block, net("10.0.5.0/24"));
        assert!(!overlaps(&block, &net("10.0.5.0/24")));
        assert!(pool.free().any(|b| *b == block));

        pool.commit(block);
        assert!(pool.is_used(&block));
        assert!(!pool.free().any(|b| *b == block));
        assert_disjoint(&pool);
    }

    #[test]
    fn test_commit_retires_partially_overlapping_free_block() {
        let mut pool = default_pool();
        assert!(pool.free().any(|b| *b == net("10.7.0.0/16")));
        pool.commit(net("10.7.128.0/17"));
        assert!(!pool.free().any(|b| *b == net("10.7.0.0/16")));
        assert_disjoint(&pool);
    }

    #[test]
    fn test_check_conflict_fails_when_exhausted() {
        let mut pool = SubnetPool::new(net("192.168.0.0/24"), 26).unwrap();
        pool.seed(&[net("192.168.0.0/26")]).unwrap();
        for _ in 0..3 {
            let (block, remapped) = pool.check_conflict(net("192.168.0.0/26")).unwrap();
            assert!(remapped);
            pool.commit(block);
        }
        assert_eq!(pool.free_count(), 0);
        assert_eq!(
            pool.check_conflict(net("192.168.0.0/26")),
            Err(IpamError::NoFreeSubnets("192.168.0.0/26".to_string()))
        );
        // Exhaustion only matters on conflict
        assert!(pool.check_conflict(net("172.16.0.0/16")).is_ok());
    }

    #[test]
    fn test_release_returns_blocks_to_free() {
        let mut pool = default_pool();
        let before = pool.free_count();
        let (block, _) = pool.check_conflict(net("10.244.0.0/16")).unwrap();
        pool.commit(block);
        assert_eq!(pool.free_count(), before - 1);

        assert!(pool.release(block));
        assert_eq!(pool.free_count(), before);
        assert!(!pool.is_used(&block));
        assert!(!pool.release(block));
        assert_disjoint(&pool);
    }

    #[test]
    fn test_release_of_native_cidr_reclaims_covering_block() {
        let mut pool = default_pool();
        pool.commit(net("10.7.0.0/24"));
        assert!(!pool.free().any(|b| *b == net("10.7.0.0/16")));
        pool.release(net("10.7.0.0/24"));
        assert!(pool.free().any(|b| *b == net("10.7.0.0/16")));
    }

    #[test]
    fn test_release_never_reclaims_blocks_under_local_cidrs() {
        let mut pool = default_pool();
        let (block, _) = pool.check_conflict(net("10.96.0.0/12")).unwrap();
        pool.commit(block);
        pool.release(block);
        assert!(!pool.free().any(|b| overlaps(b, &net("10.96.0.0/12"))));
        assert!(!pool.free().any(|b| *b == net("10.244.0.0/16")));
    }

    #[test]
    fn test_reserve_skips_conflicting_block() {
        let mut pool = default_pool();
        assert!(pool.reserve(net("10.3.0.0/16")));
        assert!(pool.reserve(net("10.3.0.0/16")));
        assert!(!pool.reserve(net("10.3.1.0/24")));
        assert!(!pool.is_used(&net("10.3.1.0/24")));
    }

    #[test]
    fn test_disjoint_after_mixed_operations() {
        let mut pool = default_pool();
        let candidates = [
            "10.244.0.0/16",
            "10.0.5.0/24",
            "10.0.0.0/16",
            "172.16.0.0/12",
            "10.244.0.0/16",
            "10.1.0.0/17",
            "10.1.0.0/16",
        ];
        let mut committed = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let (block, _) = pool.check_conflict(net(candidate)).unwrap();
            pool.commit(block);
            committed.push(block);
            assert_disjoint(&pool);
            if i % 3 == 2 {
                let released = committed.remove(0);
                pool.release(released);
                assert_disjoint(&pool);
            }
        }
    }
}
