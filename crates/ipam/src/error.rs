//! IPAM errors

use thiserror::Error;

/// Errors raised by the subnet pool
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpamError {
    /// CIDR string could not be parsed as an IPv4 network
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Every block of the super-block is in use
    #[error("No more available subnets to allocate for {0}")]
    NoFreeSubnets(String),

    /// Two local CIDRs overlap each other
    #[error("Local CIDRs overlap: {0} and {1}")]
    OverlappingLocalCidrs(String, String),

    /// Granularity is not compatible with the super-block
    #[error("Invalid granularity /{granularity} for super-block {super_block}")]
    InvalidGranularity { super_block: String, granularity: u8 },
}
