//! Reconciliation logic for ResourceOffers.
//!
//! - `admission`: quota policy deciding Accepted/Refused
//! - `tunnel_endpoint`: per-offer TunnelEndpoint state machine and subnet negotiation
//! - `broadcaster`: withdraws this cluster's own offer when sharing is disabled
//!
//! Every step of [`Reconciler::reconcile_offer`] performs at most one kind of
//! write and returns; the write triggers the next watch event, which drives
//! the next step. Version conflicts are absorbed the same way: the event for
//! the newer version re-runs the reconcile.

pub mod admission;
pub mod broadcaster;
pub mod tunnel_endpoint;

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use admission::{AdmissionPolicy, SharedAdmissionPolicy};
use crds::{OfferStatus, ResourceOffer, TUNNEL_ENDPOINT_FINALIZER};
use ipam::{SharedSubnetPool, parse_cidr};
use peering_client::{PeeringStore, StoreError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Converts a write that lost a race into `Ok(None)`.
///
/// A version conflict means someone else already advanced the object, and
/// not-found means it is gone; either way the next watch event re-runs the
/// reconcile on the current state.
pub(crate) fn absorb_stale<T>(result: Result<T, StoreError>, what: &str) -> Result<Option<T>, ControllerError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_conflict() => {
            warn!("Conflict writing {}, waiting for the next event: {}", what, e);
            Ok(None)
        }
        Err(e) if e.is_not_found() => {
            debug!("Skipped writing {}: object is gone", what);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Reconciles ResourceOffers and their derived TunnelEndpoints.
pub struct Reconciler {
    pub(crate) store: Arc<dyn PeeringStore>,
    pub(crate) pool: SharedSubnetPool,
    pub(crate) admission: SharedAdmissionPolicy,
    pub(crate) metrics: Arc<Metrics>,
    backoff: BackoffTracker,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.store.namespace())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn PeeringStore>,
        pool: SharedSubnetPool,
        policy: AdmissionPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            pool,
            admission: Arc::new(Mutex::new(policy)),
            metrics,
            backoff: BackoffTracker::new(),
        }
    }

    /// Handle to the admission policy, shared with the config subscriber.
    pub fn admission(&self) -> SharedAdmissionPolicy {
        Arc::clone(&self.admission)
    }

    /// Rebuilds in-memory state from persisted records.
    ///
    /// Nothing is persisted across restarts: subnets held by existing
    /// TunnelEndpoints go back into `used`, and the accepted set is restored
    /// from offer statuses.
    pub async fn startup_reconciliation(&self) -> Result<(), ControllerError> {
        info!("Starting startup reconciliation...");

        let endpoints = self.store.list_tunnel_endpoints().await?;
        let mut reserved = 0;
        for endpoint in &endpoints {
            let Some(cidr) = endpoint.allocated_cidr() else {
                continue;
            };
            let name = endpoint.metadata.name.as_deref().unwrap_or_default();
            match parse_cidr(cidr) {
                Ok(block) if self.pool.reserve(block) => reserved += 1,
                Ok(block) => warn!("TunnelEndpoint {} holds {}, which overlaps a used subnet", name, block),
                Err(e) => warn!("TunnelEndpoint {} holds an invalid CIDR: {}", name, e),
            }
        }

        let offers = self.store.list_offers().await?;
        let accepted = admission::lock(&self.admission).rebuild(&offers);
        self.refresh_metrics();

        info!(
            "Startup reconciliation complete: {} subnets reserved from {} endpoints, {} of {} offers accepted",
            reserved,
            endpoints.len(),
            accepted,
            offers.len()
        );
        Ok(())
    }

    /// Reconciles one ResourceOffer.
    ///
    /// Order of precedence: deletion, finalizer registration, admission of
    /// Pending offers, teardown for Refused/Deleting offers, then the
    /// TunnelEndpoint state machine for Accepted offers.
    pub async fn reconcile_offer(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let key = offer.offer_key();

        let result = if offer.is_being_deleted() {
            if offer.has_finalizer(TUNNEL_ENDPOINT_FINALIZER) {
                self.finalize_offer(offer).await
            } else {
                debug!("Offer {} is being deleted and already finalized", key);
                Ok(())
            }
        } else if !offer.has_finalizer(TUNNEL_ENDPOINT_FINALIZER) {
            self.add_finalizer(offer).await
        } else {
            match offer.offer_status() {
                OfferStatus::Pending => self.admit_offer(offer).await,
                OfferStatus::Refused | OfferStatus::Deleting => self.withdraw_offer(offer).await,
                OfferStatus::Accepted => {
                    self.count_accepted(offer);
                    self.reconcile_tunnel_endpoint(offer).await
                }
            }
        };

        self.refresh_metrics();
        result
    }

    async fn add_finalizer(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let mut updated = offer.clone();
        updated
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(TUNNEL_ENDPOINT_FINALIZER.to_string());
        if absorb_stale(self.store.set_offer_finalizers(&updated).await, "offer finalizers")?.is_some() {
            info!("Added finalizer to offer {}", offer.offer_key());
        }
        Ok(())
    }

    /// Makes sure a persisted Accepted offer holds a quota slot.
    ///
    /// A reconcile of a stale Refused copy can release the slot of an offer
    /// whose Accepted status is still being written by a configuration
    /// change. The persisted status wins.
    fn count_accepted(&self, offer: &ResourceOffer) {
        let key = offer.offer_key();
        let mut policy = admission::lock(&self.admission);
        if !policy.is_accepted(&key) {
            policy.readmit(&key);
            info!("Offer {} is Accepted but held no quota slot, recounted it", key);
        }
    }

    /// Runs the admission decision for a Pending offer and persists it.
    async fn admit_offer(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let key = offer.offer_key();
        let decision = admission::lock(&self.admission).decide(&key);

        let mut updated = offer.clone();
        updated.set_offer_status(decision);
        match self.store.set_offer_status(&updated).await {
            Ok(_) => {
                info!("Offer {} from cluster {} {:?}", key, offer.spec.cluster_id, decision);
                Ok(())
            }
            Err(e) => {
                if decision == OfferStatus::Accepted {
                    admission::lock(&self.admission).release(&key);
                }
                absorb_stale::<()>(Err(e), "offer status").map(|_| ())
            }
        }
    }

    /// Two-phase deletion: tear down dependents, then drop the finalizer.
    ///
    /// The finalizer stays in place if the teardown fails.
    async fn finalize_offer(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let key = offer.offer_key();
        info!("Offer {} is being deleted, tearing down", key);

        self.teardown_tunnel_endpoint(offer).await?;
        admission::lock(&self.admission).release(&key);

        let mut updated = offer.clone();
        if let Some(finalizers) = updated.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != TUNNEL_ENDPOINT_FINALIZER);
        }
        if absorb_stale(self.store.set_offer_finalizers(&updated).await, "offer finalizers")?.is_some() {
            info!("Removed finalizer from offer {}", key);
        }
        Ok(())
    }

    /// Tears down the endpoint of an offer that is no longer accepted.
    async fn withdraw_offer(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let key = offer.offer_key();
        admission::lock(&self.admission).release(&key);
        let removed = self.teardown_tunnel_endpoint(offer).await?;

        let stale_status = offer.status.as_ref().is_some_and(|s| {
            s.tunnel_endpoint_key.is_some() || s.remote_remapped_pod_cidr.is_some()
        });
        if stale_status {
            let mut updated = offer.clone();
            if let Some(status) = updated.status.as_mut() {
                status.tunnel_endpoint_key = None;
                status.remote_remapped_pod_cidr = None;
            }
            absorb_stale(self.store.set_offer_status(&updated).await, "offer status")?;
        }
        if removed || stale_status {
            info!("Withdrew {:?} offer {}", offer.offer_status(), key);
        } else {
            debug!("Offer {} is {:?}, nothing to do", key, offer.offer_status());
        }
        Ok(())
    }

    /// Returns the backoff delay for a failed reconcile of `key`.
    pub fn on_error(&self, key: &str) -> Duration {
        self.backoff.on_error(key)
    }

    /// Resets the backoff of `key`.
    pub fn on_success(&self, key: &str) {
        self.backoff.on_success(key);
    }

    pub(crate) fn refresh_metrics(&self) {
        let (free, used) = self.pool.counts();
        self.metrics.set_pool_counts(free, used);
        self.metrics
            .set_accepted_offers(admission::lock(&self.admission).accepted_count());
    }
}
