//! Peering Controller
//!
//! Reconciles `ResourceOffer` records published by peer clusters:
//! - Admission: accepts or refuses offers under a configurable quota
//! - TunnelEndpoint: derives one endpoint per accepted offer and negotiates
//!   a non-overlapping pod subnet for the peer
//! - Sharing: withdraws this cluster's own offer when sharing is disabled
//!
//! Configuration comes from the environment and from a cluster-scoped
//! `ClusterConfig` object that is watched for changes.

mod backoff;
mod config;
mod config_watcher;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // kube's rustls-tls feature needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Peering Controller");

    let config = Config::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
