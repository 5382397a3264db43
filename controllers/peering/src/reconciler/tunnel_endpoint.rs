//! TunnelEndpoint reconciliation.
//!
//! Each Accepted offer owns one TunnelEndpoint named `<clusterId>-tunendpoint`.
//! Its phase only moves forward:
//!
//! - `Unset`: the offer's pod CIDR is checked against the subnet pool and
//!   either kept (recorded as `None`) or remapped to a free block; the
//!   committed block is stored in the status and phase becomes `New`
//! - `New`: waits until the peer reports how it remapped our pods, copies
//!   that CIDR and moves to `Processed`
//! - `Processed`: nothing left to negotiate until the offer is deleted

use super::{Reconciler, absorb_stale};
use crate::error::ControllerError;
use crds::{
    EndpointPhase, NO_REMAP, ObjectKey, ResourceOffer, TunnelEndpoint, TunnelEndpointSpec,
    TunnelEndpointStatus,
};
use ipam::parse_cidr;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Drives the TunnelEndpoint of an Accepted offer one step forward.
    pub async fn reconcile_tunnel_endpoint(&self, offer: &ResourceOffer) -> Result<(), ControllerError> {
        let name = offer.tunnel_endpoint_name();
        let endpoint = match self.store.get_tunnel_endpoint(&name).await {
            Ok(endpoint) => self.sync_endpoint_spec(offer, endpoint).await?,
            Err(e) if e.is_not_found() => self.create_tunnel_endpoint(offer).await?,
            Err(e) => return Err(e.into()),
        };
        let Some(endpoint) = endpoint else {
            return Ok(());
        };

        match endpoint.phase() {
            EndpointPhase::Unset => self.allocate_remote_subnet(offer, &endpoint).await,
            EndpointPhase::New => {
                if self.sync_offer_status(offer, &endpoint).await? {
                    return Ok(());
                }
                self.complete_local_remapping(offer, &endpoint).await
            }
            EndpointPhase::Processed => {
                if !self.sync_offer_status(offer, &endpoint).await? {
                    debug!("TunnelEndpoint {} already processed", name);
                }
                Ok(())
            }
        }
    }

    /// Creates the endpoint with fields taken 1:1 from the offer.
    async fn create_tunnel_endpoint(&self, offer: &ResourceOffer) -> Result<Option<TunnelEndpoint>, ControllerError> {
        let endpoint = TunnelEndpoint {
            metadata: ObjectMeta {
                name: Some(offer.tunnel_endpoint_name()),
                namespace: Some(self.store.namespace().to_string()),
                owner_references: offer.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: TunnelEndpointSpec::from_offer(offer),
            status: None,
        };
        let created = absorb_stale(self.store.create_tunnel_endpoint(&endpoint).await, "tunnel endpoint")?;
        if created.is_some() {
            info!(
                "Created TunnelEndpoint {} for cluster {}",
                offer.tunnel_endpoint_name(),
                offer.spec.cluster_id
            );
        }
        Ok(created)
    }

    /// Rewrites the endpoint spec when the offer's network fields changed.
    ///
    /// The pod CIDR is frozen once a subnet was negotiated for it: the pool
    /// only ever checked and committed the original one.
    async fn sync_endpoint_spec(
        &self,
        offer: &ResourceOffer,
        endpoint: TunnelEndpoint,
    ) -> Result<Option<TunnelEndpoint>, ControllerError> {
        if endpoint.spec.matches_offer(offer) {
            return Ok(Some(endpoint));
        }
        let mut desired = TunnelEndpointSpec::from_offer(offer);
        if endpoint.phase() != EndpointPhase::Unset && desired.pod_cidr != endpoint.spec.pod_cidr {
            warn!(
                "Offer {} changed pod CIDR {} -> {} after negotiation, keeping {}",
                offer.offer_key(),
                endpoint.spec.pod_cidr,
                desired.pod_cidr,
                endpoint.spec.pod_cidr
            );
            desired.pod_cidr.clone_from(&endpoint.spec.pod_cidr);
        }
        if desired == endpoint.spec {
            return Ok(Some(endpoint));
        }

        let mut updated = endpoint;
        updated.spec = desired;
        let result = absorb_stale(self.store.update_tunnel_endpoint(&updated).await, "tunnel endpoint spec")?;
        if result.is_some() {
            info!("Updated TunnelEndpoint {} from offer {}", offer.tunnel_endpoint_name(), offer.offer_key());
        }
        Ok(result)
    }

    /// `Unset` -> `New`: resolves the peer's pod CIDR against the pool.
    ///
    /// The chosen block is committed before the endpoint status is written
    /// and released again if that write fails.
    async fn allocate_remote_subnet(&self, offer: &ResourceOffer, endpoint: &TunnelEndpoint) -> Result<(), ControllerError> {
        let pod_cidr = &offer.spec.network.pod_cidr;
        let candidate = parse_cidr(pod_cidr).map_err(|e| {
            ControllerError::InvalidCidr(format!("offer {} pod CIDR {:?}: {}", offer.offer_key(), pod_cidr, e))
        })?;

        let allocation = self.pool.allocate(candidate)?;
        let remote_remapped = if allocation.remapped {
            allocation.block.to_string()
        } else {
            NO_REMAP.to_string()
        };

        let mut updated = endpoint.clone();
        updated.status = Some(TunnelEndpointStatus {
            phase: EndpointPhase::New,
            remote_remapped_pod_cidr: Some(remote_remapped.clone()),
            local_remapped_pod_cidr: None,
            allocated_cidr: Some(allocation.block.to_string()),
            last_transition_time: Some(chrono::Utc::now()),
        });
        let written = match self.store.set_tunnel_endpoint_status(&updated).await {
            Ok(written) => written,
            Err(e) => {
                self.pool.release(allocation.block);
                return absorb_stale::<()>(Err(e), "tunnel endpoint status").map(|_| ());
            }
        };
        info!(
            "TunnelEndpoint {}: pod CIDR {} -> {} (phase New)",
            offer.tunnel_endpoint_name(),
            candidate,
            remote_remapped
        );

        self.sync_offer_status(offer, &written).await?;
        Ok(())
    }

    /// `New` -> `Processed` once the peer's remapping of our pods is known.
    async fn complete_local_remapping(&self, offer: &ResourceOffer, endpoint: &TunnelEndpoint) -> Result<(), ControllerError> {
        let Some(local_remapped) = offer.local_remapped_pod_cidr() else {
            debug!(
                "TunnelEndpoint {} waiting for the peer's local remapping",
                offer.tunnel_endpoint_name()
            );
            return Ok(());
        };

        let mut updated = endpoint.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.phase = EndpointPhase::Processed;
        status.local_remapped_pod_cidr = Some(local_remapped.to_string());
        status.last_transition_time = Some(chrono::Utc::now());
        if absorb_stale(self.store.set_tunnel_endpoint_status(&updated).await, "tunnel endpoint status")?.is_some() {
            info!(
                "TunnelEndpoint {}: local pod CIDR remapped to {} (phase Processed)",
                offer.tunnel_endpoint_name(),
                local_remapped
            );
        }
        Ok(())
    }

    /// Mirrors the endpoint key and remote remapping onto the offer status.
    ///
    /// Returns true if a write was issued.
    async fn sync_offer_status(&self, offer: &ResourceOffer, endpoint: &TunnelEndpoint) -> Result<bool, ControllerError> {
        let key = ObjectKey::new(offer.tunnel_endpoint_name(), self.store.namespace());
        let remote_remapped = endpoint
            .status
            .as_ref()
            .and_then(|s| s.remote_remapped_pod_cidr.clone());

        let current = offer.status.clone().unwrap_or_default();
        if current.tunnel_endpoint_key.as_ref() == Some(&key) && current.remote_remapped_pod_cidr == remote_remapped {
            return Ok(false);
        }

        let mut updated = offer.clone();
        let status = updated.status.get_or_insert_with(Default::default);
        status.tunnel_endpoint_key = Some(key);
        status.remote_remapped_pod_cidr = remote_remapped;
        absorb_stale(self.store.set_offer_status(&updated).await, "offer status")?;
        Ok(true)
    }

    /// Deletes the offer's endpoint and returns its subnet to the pool.
    ///
    /// A missing endpoint counts as success. Returns true if one was deleted.
    pub(crate) async fn teardown_tunnel_endpoint(&self, offer: &ResourceOffer) -> Result<bool, ControllerError> {
        let name = offer.tunnel_endpoint_name();
        let endpoint = match self.store.get_tunnel_endpoint(&name).await {
            Ok(endpoint) => endpoint,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        self.store.delete_tunnel_endpoint(&name).await?;
        info!("Deleted TunnelEndpoint {}", name);

        if let Some(cidr) = endpoint.allocated_cidr() {
            match parse_cidr(cidr) {
                Ok(block) if self.pool.release(block) => info!("Released subnet {}", block),
                Ok(block) => debug!("Subnet {} was not held", block),
                Err(e) => warn!("TunnelEndpoint {} held an invalid CIDR: {}", name, e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "tunnel_endpoint_test.rs"]
mod tests;
