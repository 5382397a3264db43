//! Admission control for incoming ResourceOffers.
//!
//! [`AdmissionPolicy`] holds the quota state and makes every accept/refuse
//! decision; it does no I/O. [`AdmissionController`] applies configuration
//! snapshots: it asks the policy which offers change status and persists
//! those changes, rolling the policy back when a write fails so that the
//! accepted count always matches the persisted `Accepted` statuses.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crds::{AdvertisementConfig, OfferStatus, ResourceOffer};
use peering_client::PeeringStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Quota state shared by the reconciler and the config subscriber.
pub type SharedAdmissionPolicy = Arc<Mutex<AdmissionPolicy>>;

pub(crate) fn lock(policy: &Mutex<AdmissionPolicy>) -> MutexGuard<'_, AdmissionPolicy> {
    policy.lock().unwrap_or_else(|p| p.into_inner())
}

/// Accept/refuse policy with a bounded number of accepted offers.
///
/// Accepted offers are tracked by offer key, so deciding or releasing the
/// same offer twice never changes the count twice.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    max_acceptable_offers: usize,
    auto_accept: bool,
    accepted: HashSet<String>,
}

/// A status change decided by [`AdmissionPolicy::on_config_change`].
#[derive(Debug, Clone)]
pub struct Transition {
    /// The offer with its new status already set
    pub offer: ResourceOffer,
    /// Status before the change
    pub from: OfferStatus,
}

impl Transition {
    fn new(offer: &ResourceOffer, to: OfferStatus) -> Self {
        let mut updated = offer.clone();
        updated.set_offer_status(to);
        Self {
            offer: updated,
            from: offer.offer_status(),
        }
    }

    /// Status after the change
    pub fn to(&self) -> OfferStatus {
        self.offer.offer_status()
    }
}

impl AdmissionPolicy {
    /// Creates a policy with an empty accepted set.
    pub fn new(max_acceptable_offers: u32, auto_accept: bool) -> Self {
        Self {
            max_acceptable_offers: max_acceptable_offers as usize,
            auto_accept,
            accepted: HashSet::new(),
        }
    }

    /// Creates a policy from a configuration snapshot.
    pub fn from_config(config: &AdvertisementConfig) -> Self {
        Self::new(config.max_acceptable_offers, config.auto_accept)
    }

    /// Maximum number of accepted offers.
    pub fn quota(&self) -> usize {
        self.max_acceptable_offers
    }

    /// Whether Pending offers may be accepted at all.
    pub fn auto_accept(&self) -> bool {
        self.auto_accept
    }

    /// Number of offers currently holding a quota slot.
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    /// True when `key` holds a quota slot.
    pub fn is_accepted(&self, key: &str) -> bool {
        self.accepted.contains(key)
    }

    /// True when `config` carries the quota and auto-accept flag already in force.
    pub fn matches(&self, config: &AdvertisementConfig) -> bool {
        self.max_acceptable_offers == config.max_acceptable_offers as usize
            && self.auto_accept == config.auto_accept
    }

    /// Decides the status of the offer identified by `key`.
    ///
    /// An offer already counted stays accepted. Otherwise it is accepted only
    /// if auto-accept is on and the quota has room.
    pub fn decide(&mut self, key: &str) -> OfferStatus {
        if self.accepted.contains(key) {
            return OfferStatus::Accepted;
        }
        if !self.auto_accept {
            debug!("Refusing offer {}: auto-accept disabled", key);
            return OfferStatus::Refused;
        }
        if self.accepted.len() < self.max_acceptable_offers {
            self.accepted.insert(key.to_string());
            OfferStatus::Accepted
        } else {
            debug!(
                "Refusing offer {}: {} of {} offers accepted",
                key,
                self.accepted.len(),
                self.max_acceptable_offers
            );
            OfferStatus::Refused
        }
    }

    /// Frees the quota slot held by `key`. Returns false if it held none.
    pub fn release(&mut self, key: &str) -> bool {
        self.accepted.remove(key)
    }

    /// Counts `key` as accepted regardless of the quota.
    ///
    /// Only used to undo an eviction that could not be persisted.
    pub fn readmit(&mut self, key: &str) {
        self.accepted.insert(key.to_string());
    }

    /// Restores the accepted set from persisted statuses, e.g. after a restart.
    pub fn rebuild(&mut self, offers: &[ResourceOffer]) -> usize {
        self.accepted = offers
            .iter()
            .filter(|o| o.offer_status() == OfferStatus::Accepted && !o.is_being_deleted())
            .map(ResourceOffer::offer_key)
            .collect();
        if self.accepted.len() > self.max_acceptable_offers {
            warn!(
                "{} accepted offers exceed the quota of {}",
                self.accepted.len(),
                self.max_acceptable_offers
            );
        }
        self.accepted.len()
    }

    /// Applies a new quota/auto-accept pair and returns the offers whose status must change.
    ///
    /// The policy state is updated before any decision is made. Raising the
    /// quota, or turning auto-accept on, re-evaluates Refused offers in input
    /// order. If more offers are accepted than the quota allows, the first
    /// accepted offers in input order are evicted to Refused.
    pub fn on_config_change(&mut self, config: &AdvertisementConfig, offers: &[ResourceOffer]) -> Vec<Transition> {
        if self.matches(config) {
            return Vec::new();
        }
        let new_quota = config.max_acceptable_offers as usize;
        let raised = new_quota > self.max_acceptable_offers || (config.auto_accept && !self.auto_accept);
        info!(
            "Admission policy changed: quota {} -> {}, auto-accept {} -> {}",
            self.max_acceptable_offers, new_quota, self.auto_accept, config.auto_accept
        );
        self.max_acceptable_offers = new_quota;
        self.auto_accept = config.auto_accept;

        let mut transitions = Vec::new();
        if raised {
            for offer in offers
                .iter()
                .filter(|o| o.offer_status() == OfferStatus::Refused && !o.is_being_deleted())
            {
                if !self.auto_accept || self.accepted.len() >= self.max_acceptable_offers {
                    break;
                }
                if self.decide(&offer.offer_key()) == OfferStatus::Accepted {
                    transitions.push(Transition::new(offer, OfferStatus::Accepted));
                }
            }
        }

        for offer in offers.iter().filter(|o| o.offer_status() == OfferStatus::Accepted) {
            if self.accepted.len() <= self.max_acceptable_offers {
                break;
            }
            if self.accepted.remove(&offer.offer_key()) {
                transitions.push(Transition::new(offer, OfferStatus::Refused));
            }
        }
        transitions
    }
}

/// Applies configuration snapshots to the admission policy and persists
/// the resulting offer status changes.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn PeeringStore>,
    policy: SharedAdmissionPolicy,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Creates a controller sharing `policy` with the reconciler.
    pub fn new(store: Arc<dyn PeeringStore>, policy: SharedAdmissionPolicy, metrics: Arc<Metrics>) -> Self {
        Self { store, policy, metrics }
    }

    /// Applies a configuration snapshot. Returns the number of offers updated.
    ///
    /// A snapshot that leaves quota and auto-accept unchanged performs no
    /// reads or writes. Version conflicts are logged and skipped; the first
    /// other store error is returned after every transition was attempted.
    pub async fn apply_config(&self, config: &AdvertisementConfig) -> Result<usize, ControllerError> {
        if lock(&self.policy).matches(config) {
            debug!("Admission settings unchanged");
            return Ok(0);
        }

        let offers = self.store.list_offers().await?;
        let transitions = lock(&self.policy).on_config_change(config, &offers);

        let mut applied = 0;
        let mut first_error = None;
        for transition in transitions {
            let key = transition.offer.offer_key();
            match self.store.set_offer_status(&transition.offer).await {
                Ok(_) => {
                    info!("Offer {}: {:?} -> {:?}", key, transition.from, transition.to());
                    applied += 1;
                }
                Err(e) => {
                    {
                        let mut policy = lock(&self.policy);
                        match transition.to() {
                            OfferStatus::Accepted => {
                                policy.release(&key);
                            }
                            _ => policy.readmit(&key),
                        }
                    }
                    if e.is_conflict() || e.is_not_found() {
                        warn!("Offer {} changed while applying configuration: {}", key, e);
                    } else {
                        error!("Failed to update offer {}: {}", key, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        self.metrics.set_accepted_offers(lock(&self.policy).accepted_count());
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(applied),
        }
    }
}

#[cfg(test)]
#[path = "admission_test.rs"]
mod tests;
