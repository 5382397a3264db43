//! Sharing policy on the offering side.
//!
//! When `enableOffering` is switched off, this cluster stops sharing
//! resources with its peer: its own ResourceOffer is marked `Deleting` and
//! deleted, then the PeeringRequest that established the relationship is
//! deleted. Missing objects count as already withdrawn.

use crate::error::ControllerError;
use crds::{AdvertisementConfig, OfferStatus};
use peering_client::{PeeringStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Withdraws this cluster's offer when resource sharing is disabled.
pub struct SharingPolicy {
    store: Arc<dyn PeeringStore>,
    local_cluster_id: String,
    peering_request: String,
    offering_enabled: bool,
    sharing_percentage: u32,
}

impl std::fmt::Debug for SharingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharingPolicy")
            .field("local_cluster_id", &self.local_cluster_id)
            .field("peering_request", &self.peering_request)
            .field("offering_enabled", &self.offering_enabled)
            .finish_non_exhaustive()
    }
}

impl SharingPolicy {
    /// `peering_request` names the PeeringRequest left by the foreign cluster.
    pub fn new(
        store: Arc<dyn PeeringStore>,
        local_cluster_id: impl Into<String>,
        peering_request: impl Into<String>,
        initial: &AdvertisementConfig,
    ) -> Self {
        Self {
            store,
            local_cluster_id: local_cluster_id.into(),
            peering_request: peering_request.into(),
            offering_enabled: initial.enable_offering,
            sharing_percentage: initial.resource_sharing_percentage,
        }
    }

    /// Diffs `config` against the last snapshot seen. Returns true if the
    /// offer was withdrawn.
    pub async fn apply_config(&mut self, config: &AdvertisementConfig) -> Result<bool, ControllerError> {
        if config.resource_sharing_percentage != self.sharing_percentage {
            info!(
                "Resource sharing percentage changed: {}% -> {}%",
                self.sharing_percentage, config.resource_sharing_percentage
            );
            self.sharing_percentage = config.resource_sharing_percentage;
        }

        let was_enabled = self.offering_enabled;
        self.offering_enabled = config.enable_offering;
        if !was_enabled || config.enable_offering {
            debug!("Offering still {}", if config.enable_offering { "enabled" } else { "disabled" });
            return Ok(false);
        }

        info!("Stopping resource sharing for cluster {}", self.local_cluster_id);
        if let Err(e) = self.withdraw().await {
            // Retry on the next snapshot
            self.offering_enabled = true;
            return Err(e);
        }
        Ok(true)
    }

    async fn withdraw(&self) -> Result<(), ControllerError> {
        let offers = self.store.list_offers().await?;
        for offer in offers.iter().filter(|o| o.spec.cluster_id == self.local_cluster_id) {
            let name = offer.metadata.name.clone().unwrap_or_default();
            if offer.offer_status() != OfferStatus::Deleting {
                let mut updated = offer.clone();
                updated.set_offer_status(OfferStatus::Deleting);
                ignore_missing(self.store.set_offer_status(&updated).await.map(|_| ()), &name)?;
            }
            ignore_missing(self.store.delete_offer(&name).await, &name)?;
            info!("Deleted offer {}", name);
        }

        ignore_missing(
            self.store.delete_peering_request(&self.peering_request).await,
            &self.peering_request,
        )?;
        info!("Deleted PeeringRequest {}", self.peering_request);
        Ok(())
    }
}

fn ignore_missing(result: Result<(), StoreError>, name: &str) -> Result<(), ControllerError> {
    match result {
        Err(e) if e.is_not_found() => {
            warn!("{} already gone", name);
            Ok(())
        }
        other => Ok(other?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_NAMESPACE, test_offer};
    use peering_client::MockPeeringStore;

    fn config(enable_offering: bool) -> AdvertisementConfig {
        AdvertisementConfig {
            enable_offering,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabling_offering_withdraws_offer_and_peering_request() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_offer(test_offer("resourceoffer-home", "home", "10.244.0.0/16"));
        store.add_offer(test_offer("resourceoffer-peer", "peer", "10.245.0.0/16"));
        store.add_peering_request("foreign");

        let mut policy = SharingPolicy::new(Arc::new(store.clone()), "home", "foreign", &config(true));
        assert!(policy.apply_config(&config(false)).await.unwrap());

        assert!(store.offer("resourceoffer-home").is_none());
        assert!(store.offer("resourceoffer-peer").is_some());
        assert!(!store.has_peering_request("foreign"));
    }

    #[tokio::test]
    async fn test_only_the_enabled_to_disabled_edge_withdraws() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_peering_request("foreign");
        let mut policy = SharingPolicy::new(Arc::new(store.clone()), "home", "foreign", &config(false));

        assert!(!policy.apply_config(&config(false)).await.unwrap());
        assert!(!policy.apply_config(&config(true)).await.unwrap());
        assert!(store.has_peering_request("foreign"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_marks_deleting_before_delete() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        let mut offer = test_offer("resourceoffer-home", "home", "10.244.0.0/16");
        offer.metadata.finalizers = Some(vec!["example.com/keep".to_string()]);
        store.add_offer(offer);

        let mut policy = SharingPolicy::new(Arc::new(store.clone()), "home", "foreign", &config(true));
        policy.apply_config(&config(false)).await.unwrap();

        let remaining = store.offer("resourceoffer-home").unwrap();
        assert_eq!(remaining.offer_status(), OfferStatus::Deleting);
        assert!(remaining.is_being_deleted());
    }

    #[tokio::test]
    async fn test_failed_withdraw_is_retried_on_next_snapshot() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_offer(test_offer("resourceoffer-home", "home", "10.244.0.0/16"));
        store.fail_next_write();

        let mut policy = SharingPolicy::new(Arc::new(store.clone()), "home", "foreign", &config(true));
        assert!(policy.apply_config(&config(false)).await.is_err());
        assert!(policy.apply_config(&config(false)).await.unwrap());
        assert!(store.offer("resourceoffer-home").is_none());
    }
}
