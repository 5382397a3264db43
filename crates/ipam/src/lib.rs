//! Subnet pool for peered clusters
//!
//! Hands out non-overlapping IPv4 blocks to peer clusters whose native pod
//! CIDR collides with one already in use locally.
//!
//! # Example
//!
//! ```
//! use ipam::{SubnetPool, parse_cidr};
//!
//! # fn example() -> Result<(), ipam::IpamError> {
//! let mut pool = SubnetPool::new(parse_cidr("10.0.0.0/8")?, 16)?;
//! pool.seed(&[parse_cidr("10.244.0.0/16")?, parse_cidr("10.96.0.0/12")?])?;
//!
//! // The peer's pod network collides with ours, so a free /16 is proposed.
//! let (block, remapped) = pool.check_conflict(parse_cidr("10.244.0.0/16")?)?;
//! assert!(remapped);
//! pool.commit(block);
//! # Ok(())
//! # }
//! ```

/// IPAM errors
pub mod error;
/// Subnet pool state
pub mod pool;
/// Lock-guarded pool handle
pub mod shared;

pub use error::IpamError;
pub use pool::{overlaps, parse_cidr, SubnetPool};
pub use shared::{Allocation, SharedSubnetPool};
