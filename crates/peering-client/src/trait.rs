//! PeeringStore trait for mocking
//!
//! The reconcilers only talk to this trait. `KubeStore` implements it on top
//! of the Kubernetes API; `MockPeeringStore` keeps everything in memory.

use crate::error::StoreError;
use crds::{ResourceOffer, TunnelEndpoint};

/// Create/read/update/delete operations on peering records
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
/// Writes taking an object use its `metadata.resourceVersion` as a
/// precondition and fail with [`StoreError::Conflict`] when it is stale.
#[async_trait::async_trait]
pub trait PeeringStore: Send + Sync {
    /// Namespace holding offers and tunnel endpoints
    fn namespace(&self) -> &str;

    // ResourceOffer operations
    async fn get_offer(&self, name: &str) -> Result<ResourceOffer, StoreError>;
    async fn list_offers(&self) -> Result<Vec<ResourceOffer>, StoreError>;
    /// Persists `metadata.finalizers`
    async fn set_offer_finalizers(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError>;
    /// Persists the status sub-object
    async fn set_offer_status(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError>;
    async fn delete_offer(&self, name: &str) -> Result<(), StoreError>;

    // TunnelEndpoint operations
    async fn get_tunnel_endpoint(&self, name: &str) -> Result<TunnelEndpoint, StoreError>;
    async fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, StoreError>;
    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError>;
    /// Persists the spec
    async fn update_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError>;
    /// Persists the status sub-object
    async fn set_tunnel_endpoint_status(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError>;
    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<(), StoreError>;

    // PeeringRequest operations
    async fn delete_peering_request(&self, name: &str) -> Result<(), StoreError>;
}
