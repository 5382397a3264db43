//! PeeringRequest CRD
//!
//! Records that a foreign cluster asked to peer with this one. The
//! controller only ever deletes it, when resource sharing is switched off.

use crate::references::ObjectKey;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Peering request left by a foreign cluster
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "discovery.liqo.io",
    version = "v1",
    kind = "PeeringRequest"
)]
#[serde(rename_all = "camelCase")]
pub struct PeeringRequestSpec {
    /// Identifier of the requesting cluster
    pub cluster_id: String,

    /// Namespace the requesting cluster uses for peering objects
    pub namespace: String,

    /// Secret holding a kubeconfig for the requesting cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config_ref: Option<ObjectKey>,
}
