//! ClusterConfig watching.
//!
//! The watcher publishes each distinct `AdvertisementConfig` into a
//! `tokio::sync::watch` channel. Subscribers always see the latest snapshot;
//! intermediate ones may be skipped, which is fine because every consumer
//! diffs against the last snapshot it applied.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::admission::AdmissionController;
use crate::reconciler::broadcaster::SharingPolicy;
use crds::{AdvertisementConfig, ClusterConfig};
use futures::StreamExt;
use kube::Api;
use kube_runtime::{WatchStreamExt, watcher};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Turns watch events on one ClusterConfig object into snapshots.
pub struct ConfigWatcher {
    api: Api<ClusterConfig>,
    name: String,
    tx: watch::Sender<AdvertisementConfig>,
}

impl ConfigWatcher {
    pub fn new(api: Api<ClusterConfig>, name: impl Into<String>, tx: watch::Sender<AdvertisementConfig>) -> Self {
        Self {
            api,
            name: name.into(),
            tx,
        }
    }

    /// Watches until the stream ends or every subscriber is gone.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Starting ClusterConfig watcher for {}", self.name);

        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.name));
        let mut stream = Box::pin(watcher(self.api.clone(), config).default_backoff().applied_objects());

        while let Some(result) = stream.next().await {
            match result {
                Ok(cluster_config) => {
                    if !self.publish(cluster_config.spec.advertisement_config) {
                        debug!("ClusterConfig {} applied without advertisement changes", self.name);
                    }
                }
                // default_backoff already delays the retry
                Err(e) => warn!("ClusterConfig watch error: {}", e),
            }
            if self.tx.is_closed() {
                info!("No ClusterConfig subscribers left, stopping watcher");
                break;
            }
        }

        Ok(())
    }

    /// Returns true if the snapshot differed from the current one.
    fn publish(&self, config: AdvertisementConfig) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            info!("ClusterConfig {} changed: {:?}", self.name, config);
            *current = config;
            true
        })
    }
}

/// Consumers of configuration snapshots.
pub struct ConfigSubscribers {
    admission: AdmissionController,
    sharing: Option<SharingPolicy>,
    metrics: Arc<Metrics>,
}

impl ConfigSubscribers {
    pub fn new(admission: AdmissionController, sharing: Option<SharingPolicy>, metrics: Arc<Metrics>) -> Self {
        Self {
            admission,
            sharing,
            metrics,
        }
    }

    /// Applies every new snapshot until the sender is dropped.
    pub async fn run(mut self, mut rx: watch::Receiver<AdvertisementConfig>) -> Result<(), ControllerError> {
        while rx.changed().await.is_ok() {
            let config = rx.borrow_and_update().clone();
            self.apply(&config).await;
        }
        info!("ClusterConfig channel closed, stopping subscribers");
        Ok(())
    }

    /// Errors are logged: each consumer retries on the next snapshot.
    async fn apply(&mut self, config: &AdvertisementConfig) {
        self.metrics.config_changes.inc();

        match self.admission.apply_config(config).await {
            Ok(0) => {}
            Ok(updated) => info!("Configuration change updated {} offers", updated),
            Err(e) => error!("Failed to apply admission settings: {}", e),
        }

        if let Some(sharing) = self.sharing.as_mut() {
            if let Err(e) = sharing.apply_config(config).await {
                error!("Failed to apply sharing settings: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::admission::{AdmissionPolicy, SharedAdmissionPolicy};
    use crate::test_utils::{TEST_NAMESPACE, offer_with_status, test_metrics, test_offer};
    use crds::OfferStatus;
    use peering_client::MockPeeringStore;
    use std::sync::Mutex;

    fn config(max_acceptable_offers: u32, enable_offering: bool) -> AdvertisementConfig {
        AdvertisementConfig {
            enable_offering,
            resource_sharing_percentage: 50,
            auto_accept: true,
            max_acceptable_offers,
        }
    }

    fn subscribers(store: &MockPeeringStore, policy: AdmissionPolicy, sharing: bool) -> ConfigSubscribers {
        let policy: SharedAdmissionPolicy = Arc::new(Mutex::new(policy));
        let metrics = test_metrics();
        let admission = AdmissionController::new(Arc::new(store.clone()), policy, Arc::clone(&metrics));
        let sharing = sharing
            .then(|| SharingPolicy::new(Arc::new(store.clone()), "home", "foreign", &config(1, true)));
        ConfigSubscribers::new(admission, sharing, metrics)
    }

    #[tokio::test]
    async fn test_snapshot_reaches_admission_and_sharing() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_offer(offer_with_status("a", OfferStatus::Refused));
        store.add_offer(test_offer("resourceoffer-home", "home", "10.244.0.0/16"));
        store.add_peering_request("foreign");

        let mut subscribers = subscribers(&store, AdmissionPolicy::new(0, true), true);
        subscribers.apply(&config(1, false)).await;

        assert_eq!(store.offer("a").unwrap().offer_status(), OfferStatus::Accepted);
        assert!(store.offer("resourceoffer-home").is_none());
        assert!(!store.has_peering_request("foreign"));
        assert_eq!(subscribers.metrics.config_changes.get(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_stop_when_sender_is_dropped() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_offer(offer_with_status("a", OfferStatus::Refused));
        let subscribers = subscribers(&store, AdmissionPolicy::new(0, true), false);

        let (tx, rx) = watch::channel(config(0, true));
        let handle = tokio::spawn(subscribers.run(rx));
        tx.send(config(1, true)).unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(store.offer("a").unwrap().offer_status(), OfferStatus::Accepted);
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_does_not_write() {
        let store = MockPeeringStore::new(TEST_NAMESPACE);
        store.add_offer(offer_with_status("a", OfferStatus::Refused));
        let mut subscribers = subscribers(&store, AdmissionPolicy::new(1, true), false);

        subscribers.apply(&config(1, true)).await;
        assert_eq!(store.write_count(), 0);
    }
}
