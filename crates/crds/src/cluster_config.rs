//! ClusterConfig CRD
//!
//! Cluster-wide settings. Consumers receive whole snapshots and diff them
//! against the last one they saw.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide peering settings
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "config.liqo.io",
    version = "v1alpha1",
    kind = "ClusterConfig"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSpec {
    /// Offer/admission settings
    pub advertisement_config: AdvertisementConfig,
}

/// Offer publication and admission settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementConfig {
    /// Whether this cluster offers resources to its peers
    #[serde(default = "default_enable_offering")]
    pub enable_offering: bool,

    /// Share of local capacity included in outgoing offers (0-100)
    #[serde(default = "default_sharing_percentage")]
    pub resource_sharing_percentage: u32,

    /// Accept incoming offers without operator intervention
    #[serde(default)]
    pub auto_accept: bool,

    /// Maximum number of concurrently accepted incoming offers
    #[serde(default)]
    pub max_acceptable_offers: u32,
}

fn default_enable_offering() -> bool {
    true
}

fn default_sharing_percentage() -> u32 {
    50
}

impl Default for AdvertisementConfig {
    fn default() -> Self {
        Self {
            enable_offering: default_enable_offering(),
            resource_sharing_percentage: default_sharing_percentage(),
            auto_accept: false,
            max_acceptable_offers: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_config_defaults_from_partial_json() {
        let config: AdvertisementConfig =
            serde_json::from_str(r#"{"autoAccept": true, "maxAcceptableOffers": 10}"#).unwrap();
        assert!(config.enable_offering);
        assert_eq!(config.resource_sharing_percentage, 50);
        assert!(config.auto_accept);
        assert_eq!(config.max_acceptable_offers, 10);
    }
}
