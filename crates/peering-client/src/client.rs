//! Kubernetes-backed resource store
//!
//! Status and finalizer writes are merge patches that carry the object's
//! `resourceVersion`, so the API server rejects them with 409 when the object
//! moved on since it was read. Status types serialize unset optional fields
//! as `null`, which the merge patch turns into field removals.

use crate::error::StoreError;
use crate::store_trait::PeeringStore;
use crds::{PeeringRequest, ResourceOffer, TunnelEndpoint};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

/// Resource store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    namespace: String,
    offer_api: Api<ResourceOffer>,
    tunnel_endpoint_api: Api<TunnelEndpoint>,
    peering_request_api: Api<PeeringRequest>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").field("namespace", &self.namespace).finish()
    }
}

impl KubeStore {
    /// Creates a store for offers and endpoints in `namespace`.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            offer_api: Api::namespaced(client.clone(), &namespace),
            tunnel_endpoint_api: Api::namespaced(client.clone(), &namespace),
            peering_request_api: Api::all(client),
            namespace,
        }
    }

    /// Namespaced ResourceOffer API, for watching
    pub fn offer_api(&self) -> &Api<ResourceOffer> {
        &self.offer_api
    }

    /// Namespaced TunnelEndpoint API, for watching
    pub fn tunnel_endpoint_api(&self) -> &Api<TunnelEndpoint> {
        &self.tunnel_endpoint_api
    }
}

fn object_name<K: Resource>(obj: &K, kind: &str) -> Result<String, StoreError> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidRequest(format!("{} missing name", kind)))
}

/// Merge patch replacing the status. Unset fields are sent as `null` and
/// therefore removed.
fn status_patch<S: Serialize>(resource_version: Option<String>, status: &Option<S>) -> Result<Value, StoreError> {
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": serde_json::to_value(status)?,
    }))
}

fn ignore_not_found(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}

#[async_trait::async_trait]
impl PeeringStore for KubeStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_offer(&self, name: &str) -> Result<ResourceOffer, StoreError> {
        Ok(self.offer_api.get(name).await?)
    }

    async fn list_offers(&self) -> Result<Vec<ResourceOffer>, StoreError> {
        Ok(self.offer_api.list(&ListParams::default()).await?.items)
    }

    async fn set_offer_finalizers(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError> {
        let name = object_name(offer, "ResourceOffer")?;
        let patch = json!({
            "metadata": {
                "finalizers": offer.finalizers(),
                "resourceVersion": offer.resource_version(),
            }
        });
        debug!("Patching finalizers of ResourceOffer {}/{}", self.namespace, name);
        Ok(self
            .offer_api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn set_offer_status(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError> {
        let name = object_name(offer, "ResourceOffer")?;
        let patch = status_patch(offer.resource_version(), &offer.status)?;
        debug!("Patching status of ResourceOffer {}/{}", self.namespace, name);
        Ok(self
            .offer_api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_offer(&self, name: &str) -> Result<(), StoreError> {
        ignore_not_found(
            self.offer_api
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(StoreError::from),
        )
    }

    async fn get_tunnel_endpoint(&self, name: &str) -> Result<TunnelEndpoint, StoreError> {
        Ok(self.tunnel_endpoint_api.get(name).await?)
    }

    async fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, StoreError> {
        Ok(self.tunnel_endpoint_api.list(&ListParams::default()).await?.items)
    }

    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        Ok(self
            .tunnel_endpoint_api
            .create(&PostParams::default(), endpoint)
            .await?)
    }

    async fn update_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        let name = object_name(endpoint, "TunnelEndpoint")?;
        let patch = json!({
            "metadata": { "resourceVersion": endpoint.resource_version() },
            "spec": endpoint.spec,
        });
        Ok(self
            .tunnel_endpoint_api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn set_tunnel_endpoint_status(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        let name = object_name(endpoint, "TunnelEndpoint")?;
        let patch = status_patch(endpoint.resource_version(), &endpoint.status)?;
        Ok(self
            .tunnel_endpoint_api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<(), StoreError> {
        ignore_not_found(
            self.tunnel_endpoint_api
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(StoreError::from),
        )
    }

    async fn delete_peering_request(&self, name: &str) -> Result<(), StoreError> {
        ignore_not_found(
            self.peering_request_api
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(StoreError::from),
        )
    }
}
