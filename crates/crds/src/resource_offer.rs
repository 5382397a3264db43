//! ResourceOffer CRD
//!
//! Published by a peer cluster to advertise a slice of its compute capacity
//! together with the network information needed to reach its pods.

use crate::references::ObjectKey;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer guarding teardown of the derived TunnelEndpoint.
pub const TUNNEL_ENDPOINT_FINALIZER: &str = "tunnelendpointcreator.net.liqo.io/finalizer";

/// Suffix appended to the cluster ID to name the derived TunnelEndpoint.
pub const TUNNEL_ENDPOINT_NAME_SUFFIX: &str = "-tunendpoint";

/// Value recorded in remapped-CIDR fields when the native pod CIDR is kept.
pub const NO_REMAP: &str = "None";

/// Resources and network parameters a peer cluster offers
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "peering.liqo.io",
    version = "v1",
    kind = "ResourceOffer",
    namespaced,
    status = "ResourceOfferStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterId"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.offerStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOfferSpec {
    /// Identifier of the cluster publishing the offer
    pub cluster_id: String,

    /// Network parameters of the offering cluster
    pub network: NetworkConfig,

    /// Offered resources (resource name -> quantity, e.g. "cpu" -> "4")
    #[serde(default)]
    pub resource_quota: BTreeMap<String, String>,

    /// Expiry of the offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<chrono::DateTime<chrono::Utc>>,
}

/// Network parameters of the offering cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Native pod CIDR of the offering cluster
    pub pod_cidr: String,

    /// Public IP of the offering cluster's gateway
    pub gateway_ip: String,

    /// Private IP of the offering cluster's gateway
    pub gateway_private_ip: String,
}

/// Status of a ResourceOffer.
///
/// Optional fields serialize as `null` when unset, so a merge patch of the
/// whole status clears them on the server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOfferStatus {
    /// Admission decision
    #[serde(default)]
    pub offer_status: OfferStatus,

    /// Subnet the local cluster uses for the peer's pods ("None" when not remapped)
    #[serde(default)]
    pub remote_remapped_pod_cidr: Option<String>,

    /// Subnet the peer uses for the local cluster's pods, set by the peer
    #[serde(default)]
    pub local_remapped_pod_cidr: Option<String>,

    /// Key of the derived TunnelEndpoint
    #[serde(default)]
    pub tunnel_endpoint_key: Option<ObjectKey>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// Admission state of an offer
///
/// Serializes as PascalCase but also accepts lowercase.
#[serde(rename_all = "PascalCase")]
pub enum OfferStatus {
    /// Not yet evaluated
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Counted against the quota
    #[serde(alias = "accepted")]
    Accepted,

    /// Rejected by quota or by a disabled auto-accept
    #[serde(alias = "refused")]
    Refused,

    /// Withdrawn by its publisher
    #[serde(alias = "deleting")]
    Deleting,
}

impl ResourceOffer {
    /// Key used to track the offer in the admission quota.
    ///
    /// Falls back to the cluster ID for offers that have no name yet.
    pub fn offer_key(&self) -> String {
        match (&self.metadata.namespace, &self.metadata.name) {
            (Some(ns), Some(name)) => format!("{}/{}", ns, name),
            (None, Some(name)) => name.clone(),
            _ => self.spec.cluster_id.clone(),
        }
    }

    /// Current admission status (Pending when no status has been written).
    pub fn offer_status(&self) -> OfferStatus {
        self.status
            .as_ref()
            .map(|s| s.offer_status)
            .unwrap_or_default()
    }

    /// Sets the admission status, creating the status sub-object if needed.
    pub fn set_offer_status(&mut self, offer_status: OfferStatus) {
        self.status.get_or_insert_with(Default::default).offer_status = offer_status;
    }

    /// True once a deletion timestamp has been set.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True when `finalizer` is present in the metadata.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Name of the TunnelEndpoint derived from this offer.
    pub fn tunnel_endpoint_name(&self) -> String {
        tunnel_endpoint_name(&self.spec.cluster_id)
    }

    /// The peer's remapping of our pod CIDR, once reported.
    pub fn local_remapped_pod_cidr(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.local_remapped_pod_cidr.as_deref())
            .filter(|cidr| !cidr.is_empty())
    }
}

/// Derives the TunnelEndpoint name for a cluster.
pub fn tunnel_endpoint_name(cluster_id: &str) -> String {
    format!("{}{}", cluster_id, TUNNEL_ENDPOINT_NAME_SUFFIX)
}
