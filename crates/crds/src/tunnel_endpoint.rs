//! TunnelEndpoint CRD
//!
//! Derived 1:1 from an accepted ResourceOffer; carries the negotiated
//! addressing used to build the cross-cluster network path.

use crate::resource_offer::ResourceOffer;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Addressing of one peer, copied from its ResourceOffer
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "net.liqo.io",
    version = "v1",
    kind = "TunnelEndpoint",
    namespaced,
    status = "TunnelEndpointStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterID"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelEndpointSpec {
    /// Identifier of the peer cluster
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    /// Native pod CIDR of the peer cluster
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    /// Public IP of the peer's gateway
    #[serde(rename = "tunnelPublicIP")]
    pub tunnel_public_ip: String,

    /// Private IP of the peer's gateway
    #[serde(rename = "tunnelPrivateIP")]
    pub tunnel_private_ip: String,
}

impl TunnelEndpointSpec {
    /// Materializes the endpoint fields from an offer.
    pub fn from_offer(offer: &ResourceOffer) -> Self {
        Self {
            cluster_id: offer.spec.cluster_id.clone(),
            pod_cidr: offer.spec.network.pod_cidr.clone(),
            tunnel_public_ip: offer.spec.network.gateway_ip.clone(),
            tunnel_private_ip: offer.spec.network.gateway_private_ip.clone(),
        }
    }

    /// Compares cluster ID, pod CIDR and both gateway IPs with the offer.
    pub fn matches_offer(&self, offer: &ResourceOffer) -> bool {
        self.cluster_id == offer.spec.cluster_id
            && self.pod_cidr == offer.spec.network.pod_cidr
            && self.tunnel_public_ip == offer.spec.network.gateway_ip
            && self.tunnel_private_ip == offer.spec.network.gateway_private_ip
    }
}

/// Status of a TunnelEndpoint. Unset optional fields serialize as `null`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelEndpointStatus {
    /// Negotiation phase
    #[serde(default)]
    pub phase: EndpointPhase,

    /// Subnet assigned locally to the peer's pods ("None" when not remapped)
    #[serde(default, rename = "remoteRemappedPodCIDR")]
    pub remote_remapped_pod_cidr: Option<String>,

    /// Subnet the peer assigned to our pods
    #[serde(default, rename = "localRemappedPodCIDR")]
    pub local_remapped_pod_cidr: Option<String>,

    /// Block committed in the local subnet pool for the peer's pods.
    ///
    /// Either the native pod CIDR or the remapped subnet, as negotiated in
    /// `Unset`. Released verbatim on teardown.
    #[serde(default, rename = "allocatedCIDR")]
    pub allocated_cidr: Option<String>,

    /// Time of the last phase change
    #[serde(default)]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Negotiation phase of a TunnelEndpoint.
///
/// Ordered: a phase may only move forward (`Unset < New < Processed`).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum EndpointPhase {
    /// Created, no subnet negotiated yet
    #[default]
    #[serde(rename = "")]
    Unset,

    /// Remote subnet resolved, waiting for the peer's local remapping
    New,

    /// Both sides of the remapping are known
    Processed,
}

impl TunnelEndpoint {
    /// Current phase (`Unset` when no status has been written).
    pub fn phase(&self) -> EndpointPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// The block this endpoint holds in the local subnet pool, if any.
    ///
    /// Read from the status, never from the spec: the spec pod CIDR may be
    /// edited after negotiation but the committed block does not move.
    pub fn allocated_cidr(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        if status.phase == EndpointPhase::Unset {
            return None;
        }
        status.allocated_cidr.as_deref().filter(|cidr| !cidr.is_empty())
    }
}
