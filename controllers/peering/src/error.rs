//! Controller-specific error types.
//!
//! Library errors (store, IPAM, Kubernetes) are wrapped so the reconcile
//! loop can decide per variant whether to requeue.

use ipam::IpamError;
use kube::Error as KubeError;
use peering_client::StoreError;
use thiserror::Error;

/// Errors that can occur in the Peering Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Resource store error (not-found and conflicts are usually absorbed before this)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Subnet pool error, e.g. no free subnet left
    #[error("IPAM error: {0}")]
    Ipam(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed CIDR on an offer; waits for the offer to change
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe/metrics server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Errors that a retry cannot fix until the object itself changes.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ControllerError::InvalidCidr(_))
    }
}
