//! Cluster peering CRD Definitions
//!
//! Kubernetes Custom Resource Definitions exchanged between peered clusters.

/// ClusterConfig CRD
pub mod cluster_config;
/// PeeringRequest CRD
pub mod peering_request;
/// Object references shared by the CRDs
pub mod references;
/// ResourceOffer CRD
pub mod resource_offer;
/// TunnelEndpoint CRD
pub mod tunnel_endpoint;

pub use cluster_config::*;
pub use peering_request::*;
pub use references::*;
pub use resource_offer::*;
pub use tunnel_endpoint::*;
