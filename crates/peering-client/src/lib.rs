//! Peering resource store
//!
//! CRUD access to the three record kinds the peering controller works with:
//! `ResourceOffer`, `TunnelEndpoint` and `PeeringRequest`.
//!
//! Writes are guarded by the object's `resourceVersion`; a stale write fails
//! with [`StoreError::Conflict`] so callers can drop it and wait for the next
//! watch event.
//!
//! # Example
//!
//! ```no_run
//! use peering_client::{KubeStore, PeeringStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client, "liqo");
//!
//! for offer in store.list_offers().await? {
//!     println!("{} offers {:?}", offer.spec.cluster_id, offer.spec.resource_quota);
//! }
//! # Ok(())
//! # }
//! ```

/// Kubernetes-backed store
pub mod client;
/// Store errors
pub mod error;
/// The store abstraction
#[path = "trait.rs"]
pub mod store_trait;
/// In-memory store for tests
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use store_trait::PeeringStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPeeringStore;
