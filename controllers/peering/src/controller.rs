//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the store, the
//! subnet pool and the reconcilers together and runs every background task.

use crate::config::Config;
use crate::config_watcher::{ConfigSubscribers, ConfigWatcher};
use crate::error::ControllerError;
use crate::metrics::{Metrics, ServerState};
use crate::reconciler::Reconciler;
use crate::reconciler::admission::{AdmissionController, AdmissionPolicy};
use crate::reconciler::broadcaster::SharingPolicy;
use crate::watcher::watch_offers;
use crds::{AdvertisementConfig, ClusterConfig};
use ipam::SharedSubnetPool;
use kube::{Api, Client};
use peering_client::{KubeStore, PeeringStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for cluster peering.
pub struct Controller {
    offer_watcher: JoinHandle<Result<(), ControllerError>>,
    config_watcher: JoinHandle<Result<(), ControllerError>>,
    config_subscribers: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates the controller, rebuilds in-memory state and starts all tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Peering Controller");

        let client = Client::try_default().await?;
        let kube_store = KubeStore::new(client.clone(), config.namespace.clone());
        let offer_api = kube_store.offer_api().clone();
        let endpoint_api = kube_store.tunnel_endpoint_api().clone();
        let store: Arc<dyn PeeringStore> = Arc::new(kube_store);

        let cluster_config_api: Api<ClusterConfig> = Api::all(client);
        let initial = match cluster_config_api.get_opt(&config.cluster_config_name).await? {
            Some(cluster_config) => cluster_config.spec.advertisement_config,
            None => {
                warn!(
                    "ClusterConfig {} not found, using default advertisement settings",
                    config.cluster_config_name
                );
                AdvertisementConfig::default()
            }
        };
        info!("Initial advertisement settings: {:?}", initial);

        let metrics = Arc::new(Metrics::new()?);
        let server_state = ServerState::new(Arc::clone(&metrics));
        let pool = SharedSubnetPool::new(config.subnet_pool()?);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            pool,
            AdmissionPolicy::from_config(&initial),
            Arc::clone(&metrics),
        ));

        // Must finish before the first reconcile, or the pool could hand out a held subnet
        reconciler.startup_reconciliation().await?;

        let server = {
            let state = server_state.clone();
            let addr = config.metrics_addr;
            tokio::spawn(async move { crate::metrics::serve(addr, state).await })
        };

        let (tx, rx) = watch::channel(initial.clone());
        let sharing = match (&config.local_cluster_id, &config.foreign_cluster_id) {
            (Some(local), Some(foreign)) => Some(SharingPolicy::new(Arc::clone(&store), local, foreign, &initial)),
            _ => {
                info!("LOCAL_CLUSTER_ID/FOREIGN_CLUSTER_ID not set, sharing policy disabled");
                None
            }
        };
        let admission = AdmissionController::new(Arc::clone(&store), reconciler.admission(), Arc::clone(&metrics));
        let subscribers = ConfigSubscribers::new(admission, sharing, metrics);
        let config_subscribers = tokio::spawn(subscribers.run(rx));

        let watcher = ConfigWatcher::new(cluster_config_api, config.cluster_config_name.clone(), tx);
        let config_watcher = tokio::spawn(watcher.run());

        let offer_watcher = tokio::spawn(watch_offers(offer_api, endpoint_api, reconciler));

        server_state.set_ready();

        Ok(Self {
            offer_watcher,
            config_watcher,
            config_subscribers,
            server,
        })
    }

    /// Runs the controller until a task exits.
    ///
    /// The offer watcher returns on SIGTERM/SIGINT; any other task exiting
    /// is treated as fatal.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Peering Controller running");

        tokio::select! {
            result = &mut self.offer_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ResourceOffer watcher panicked: {}", e)))??;
                info!("ResourceOffer watcher finished, shutting down");
            }
            result = &mut self.config_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ClusterConfig watcher panicked: {}", e)))??;
                return Err(ControllerError::Watch("ClusterConfig watcher exited".to_string()));
            }
            result = &mut self.config_subscribers => {
                result.map_err(|e| ControllerError::Watch(format!("ClusterConfig subscribers panicked: {}", e)))??;
                return Err(ControllerError::Watch("ClusterConfig subscribers exited".to_string()));
            }
            result = &mut self.server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
                return Err(ControllerError::Watch("Metrics server exited".to_string()));
            }
        }

        Ok(())
    }
}
