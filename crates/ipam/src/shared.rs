//! Mutex-guarded subnet pool shared by concurrent reconciles.
//!
//! `check_conflict` followed by `commit` must happen under one lock, or two
//! reconciles could both be handed the same free block.

use crate::error::IpamError;
use crate::pool::SubnetPool;
use ipnet::Ipv4Net;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Result of an atomic check-and-commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Block now held in `used`
    pub block: Ipv4Net,
    /// True when `block` differs from the requested candidate
    pub remapped: bool,
}

/// Cloneable handle to a single [`SubnetPool`].
#[derive(Debug, Clone)]
pub struct SharedSubnetPool {
    inner: Arc<Mutex<SubnetPool>>,
}

impl SharedSubnetPool {
    /// Wraps `pool` for sharing between reconciles.
    pub fn new(pool: SubnetPool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Resolves conflicts for `candidate` and commits the chosen block.
    pub fn allocate(&self, candidate: Ipv4Net) -> Result<Allocation, IpamError> {
        let mut pool = self.lock();
        let (block, remapped) = pool.check_conflict(candidate)?;
        pool.commit(block);
        if remapped {
            info!("Remapped {} to {}", candidate, block);
        }
        Ok(Allocation { block, remapped })
    }

    /// See [`SubnetPool::release`].
    pub fn release(&self, block: Ipv4Net) -> bool {
        self.lock().release(block)
    }

    /// See [`SubnetPool::reserve`].
    pub fn reserve(&self, block: Ipv4Net) -> bool {
        self.lock().reserve(block)
    }

    /// Number of (free, used) blocks.
    pub fn counts(&self) -> (usize, usize) {
        let pool = self.lock();
        (pool.free_count(), pool.used_count())
    }

    /// See [`SubnetPool::is_used`].
    pub fn is_used(&self, block: &Ipv4Net) -> bool {
        self.lock().is_used(block)
    }

    // Pool operations never leave the sets half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SubnetPool> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
