//! ResourceOffer watch loop.
//!
//! Uses `kube_runtime::Controller`, which reconnects the watch, queues one
//! reconcile per offer at a time and runs different offers concurrently.
//! Changes to owned TunnelEndpoints map back to their offer.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{ResourceOffer, TunnelEndpoint};
use futures::StreamExt;
use kube::Api;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Short debounce: each reconcile step writes once and waits for the echo.
const DEBOUNCE: Duration = Duration::from_secs(1);
const CONCURRENCY: u16 = 4;

async fn reconcile(offer: Arc<ResourceOffer>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let key = offer.offer_key();
    debug!("Reconciling ResourceOffer {}", key);

    ctx.reconcile_offer(&offer).await?;
    ctx.on_success(&key);
    ctx.metrics.record_reconcile(true);
    Ok(Action::await_change())
}

fn error_policy(offer: Arc<ResourceOffer>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let key = offer.offer_key();
    ctx.metrics.record_reconcile(false);

    if error.is_permanent() {
        warn!("ResourceOffer {} needs to change before it can be reconciled: {}", key, error);
        return Action::await_change();
    }
    let delay = ctx.on_error(&key);
    error!(
        "Reconciliation error for ResourceOffer {}: {} (retrying in {}s)",
        key,
        error,
        delay.as_secs()
    );
    Action::requeue(delay)
}

/// Watches ResourceOffers and their TunnelEndpoints until shutdown.
pub async fn watch_offers(
    offer_api: Api<ResourceOffer>,
    endpoint_api: Api<TunnelEndpoint>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting ResourceOffer watcher");

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(CONCURRENCY);

    Controller::new(offer_api, watcher::Config::default())
        .owns(endpoint_api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled ResourceOffer {}", obj.name),
                Err(e) => debug!("ResourceOffer controller event: {}", e),
            }
        })
        .await;

    info!("ResourceOffer watcher stopped");
    Ok(())
}
