//! Mock PeeringStore for unit testing
//!
//! Keeps records in memory and mimics the API server closely enough for
//! reconcile tests:
//!
//! - every write bumps `resourceVersion`; a write carrying a stale version fails with `Conflict`
//! - status is dropped on create (status subresource semantics)
//! - status writes are applied as JSON merge patches, like `KubeStore`'s:
//!   a field serialized as `null` is removed, an omitted field is kept
//! - deleting an object that still has finalizers only sets its deletion
//!   timestamp; it disappears once the last finalizer is removed
//! - every successful write is logged, so tests can assert idempotency

use crate::error::StoreError;
use crate::store_trait::PeeringStore;
use crds::{ResourceOffer, TunnelEndpoint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// RFC 7386 merge of `patch` into `target`.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(fields) = target {
        for (key, value) in entries {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Applies `{"status": patch}` to a stored status the way the API server would.
fn merge_status<S>(stored: &Option<S>, patch: &Option<S>) -> Result<Option<S>, StoreError>
where
    S: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(stored)?;
    merge_patch(&mut merged, &serde_json::to_value(patch)?);
    Ok(serde_json::from_value(merged)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectedFailure {
    Conflict,
    Unavailable,
}

/// Mock resource store for testing
#[derive(Clone, Debug)]
pub struct MockPeeringStore {
    namespace: String,
    offers: Arc<Mutex<HashMap<String, ResourceOffer>>>,
    tunnel_endpoints: Arc<Mutex<HashMap<String, TunnelEndpoint>>>,
    peering_requests: Arc<Mutex<HashSet<String>>>,
    next_resource_version: Arc<Mutex<u64>>,
    writes: Arc<Mutex<Vec<String>>>,
    injected_failure: Arc<Mutex<Option<InjectedFailure>>>,
}

impl MockPeeringStore {
    /// Create an empty store serving `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            offers: Arc::new(Mutex::new(HashMap::new())),
            tunnel_endpoints: Arc::new(Mutex::new(HashMap::new())),
            peering_requests: Arc::new(Mutex::new(HashSet::new())),
            next_resource_version: Arc::new(Mutex::new(1)),
            writes: Arc::new(Mutex::new(Vec::new())),
            injected_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Add an offer to the mock store (for test setup), returning the stored copy
    pub fn add_offer(&self, mut offer: ResourceOffer) -> ResourceOffer {
        offer.metadata.namespace = Some(self.namespace.clone());
        offer.metadata.resource_version = Some(self.next_resource_version());
        let name = offer.metadata.name.clone().unwrap_or_default();
        self.offers.lock().unwrap().insert(name, offer.clone());
        offer
    }

    /// Add a tunnel endpoint to the mock store (for test setup)
    pub fn add_tunnel_endpoint(&self, mut endpoint: TunnelEndpoint) -> TunnelEndpoint {
        endpoint.metadata.namespace = Some(self.namespace.clone());
        endpoint.metadata.resource_version = Some(self.next_resource_version());
        let name = endpoint.metadata.name.clone().unwrap_or_default();
        self.tunnel_endpoints.lock().unwrap().insert(name, endpoint.clone());
        endpoint
    }

    /// Add a peering request to the mock store (for test setup)
    pub fn add_peering_request(&self, name: &str) {
        self.peering_requests.lock().unwrap().insert(name.to_string());
    }

    /// Stored copy of offer `name`
    pub fn offer(&self, name: &str) -> Option<ResourceOffer> {
        self.offers.lock().unwrap().get(name).cloned()
    }

    /// Stored copy of endpoint `name`
    pub fn tunnel_endpoint(&self, name: &str) -> Option<TunnelEndpoint> {
        self.tunnel_endpoints.lock().unwrap().get(name).cloned()
    }

    /// True while peering request `name` exists
    pub fn has_peering_request(&self, name: &str) -> bool {
        self.peering_requests.lock().unwrap().contains(name)
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Log of successful writes ("<operation> <name>")
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Make the next write fail with a version conflict
    pub fn conflict_on_next_write(&self) {
        *self.injected_failure.lock().unwrap() = Some(InjectedFailure::Conflict);
    }

    /// Make the next write fail with a non-conflict API error
    pub fn fail_next_write(&self) {
        *self.injected_failure.lock().unwrap() = Some(InjectedFailure::Unavailable);
    }

    fn next_resource_version(&self) -> String {
        let mut rv = self.next_resource_version.lock().unwrap();
        let current = *rv;
        *rv += 1;
        current.to_string()
    }

    fn record_write(&self, operation: &str, name: &str) {
        self.writes.lock().unwrap().push(format!("{} {}", operation, name));
    }

    /// Consumes an injected failure, if any
    fn take_injected_failure(&self, name: &str) -> Result<(), StoreError> {
        match self.injected_failure.lock().unwrap().take() {
            Some(InjectedFailure::Conflict) => Err(StoreError::Conflict(format!(
                "the object {} has been modified; please apply your changes to the latest version",
                name
            ))),
            Some(InjectedFailure::Unavailable) => Err(StoreError::InvalidRequest(format!(
                "injected failure writing {}",
                name
            ))),
            None => Ok(()),
        }
    }

    /// Checks the write precondition and bumps the stored version
    fn check_and_bump(&self, stored: &mut ObjectMeta, incoming: &ObjectMeta, name: &str) -> Result<(), StoreError> {
        self.take_injected_failure(name)?;
        if let Some(rv) = &incoming.resource_version {
            if stored.resource_version.as_ref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "the object {} has been modified; please apply your changes to the latest version",
                    name
                )));
            }
        }
        stored.resource_version = Some(self.next_resource_version());
        Ok(())
    }

    fn name_of(meta: &ObjectMeta, kind: &str) -> Result<String, StoreError> {
        meta.name
            .clone()
            .ok_or_else(|| StoreError::InvalidRequest(format!("{} missing name", kind)))
    }
}

fn now() -> Option<Time> {
    serde_json::from_value(serde_json::json!(chrono::Utc::now().to_rfc3339())).ok()
}

#[async_trait::async_trait]
impl PeeringStore for MockPeeringStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_offer(&self, name: &str) -> Result<ResourceOffer, StoreError> {
        self.offer(name)
            .ok_or_else(|| StoreError::NotFound(format!("ResourceOffer {}", name)))
    }

    async fn list_offers(&self) -> Result<Vec<ResourceOffer>, StoreError> {
        let mut offers: Vec<ResourceOffer> = self.offers.lock().unwrap().values().cloned().collect();
        offers.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(offers)
    }

    async fn set_offer_finalizers(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError> {
        let name = Self::name_of(&offer.metadata, "ResourceOffer")?;
        let mut offers = self.offers.lock().unwrap();
        let stored = offers
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(format!("ResourceOffer {}", name)))?;
        self.check_and_bump(&mut stored.metadata, &offer.metadata, &name)?;
        let finalizers = offer.metadata.finalizers.clone().unwrap_or_default();
        stored.metadata.finalizers = (!finalizers.is_empty()).then_some(finalizers);
        let updated = stored.clone();
        if updated.metadata.deletion_timestamp.is_some() && updated.metadata.finalizers.is_none() {
            offers.remove(&name);
        }
        drop(offers);
        self.record_write("offer/finalizers", &name);
        Ok(updated)
    }

    async fn set_offer_status(&self, offer: &ResourceOffer) -> Result<ResourceOffer, StoreError> {
        let name = Self::name_of(&offer.metadata, "ResourceOffer")?;
        let mut offers = self.offers.lock().unwrap();
        let stored = offers
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(format!("ResourceOffer {}", name)))?;
        let merged = merge_status(&stored.status, &offer.status)?;
        self.check_and_bump(&mut stored.metadata, &offer.metadata, &name)?;
        stored.status = merged;
        let updated = stored.clone();
        drop(offers);
        self.record_write("offer/status", &name);
        Ok(updated)
    }

    async fn delete_offer(&self, name: &str) -> Result<(), StoreError> {
        let mut offers = self.offers.lock().unwrap();
        let Some(stored) = offers.get_mut(name) else {
            return Ok(());
        };
        self.take_injected_failure(name)?;
        if stored.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = now();
                stored.metadata.resource_version = Some(self.next_resource_version());
            }
        } else {
            offers.remove(name);
        }
        drop(offers);
        self.record_write("offer/delete", name);
        Ok(())
    }

    async fn get_tunnel_endpoint(&self, name: &str) -> Result<TunnelEndpoint, StoreError> {
        self.tunnel_endpoint(name)
            .ok_or_else(|| StoreError::NotFound(format!("TunnelEndpoint {}", name)))
    }

    async fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, StoreError> {
        let mut endpoints: Vec<TunnelEndpoint> =
            self.tunnel_endpoints.lock().unwrap().values().cloned().collect();
        endpoints.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(endpoints)
    }

    async fn create_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        let name = Self::name_of(&endpoint.metadata, "TunnelEndpoint")?;
        let mut endpoints = self.tunnel_endpoints.lock().unwrap();
        self.take_injected_failure(&name)?;
        if endpoints.contains_key(&name) {
            return Err(StoreError::Conflict(format!("TunnelEndpoint {} already exists", name)));
        }
        let mut created = endpoint.clone();
        created.metadata.namespace = Some(self.namespace.clone());
        created.metadata.resource_version = Some(self.next_resource_version());
        created.status = None;
        endpoints.insert(name.clone(), created.clone());
        drop(endpoints);
        self.record_write("endpoint/create", &name);
        Ok(created)
    }

    async fn update_tunnel_endpoint(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        let name = Self::name_of(&endpoint.metadata, "TunnelEndpoint")?;
        let mut endpoints = self.tunnel_endpoints.lock().unwrap();
        let stored = endpoints
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(format!("TunnelEndpoint {}", name)))?;
        self.check_and_bump(&mut stored.metadata, &endpoint.metadata, &name)?;
        stored.spec = endpoint.spec.clone();
        let updated = stored.clone();
        drop(endpoints);
        self.record_write("endpoint/update", &name);
        Ok(updated)
    }

    async fn set_tunnel_endpoint_status(&self, endpoint: &TunnelEndpoint) -> Result<TunnelEndpoint, StoreError> {
        let name = Self::name_of(&endpoint.metadata, "TunnelEndpoint")?;
        let mut endpoints = self.tunnel_endpoints.lock().unwrap();
        let stored = endpoints
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(format!("TunnelEndpoint {}", name)))?;
        let merged = merge_status(&stored.status, &endpoint.status)?;
        self.check_and_bump(&mut stored.metadata, &endpoint.metadata, &name)?;
        stored.status = merged;
        let updated = stored.clone();
        drop(endpoints);
        self.record_write("endpoint/status", &name);
        Ok(updated)
    }

    async fn delete_tunnel_endpoint(&self, name: &str) -> Result<(), StoreError> {
        let mut endpoints = self.tunnel_endpoints.lock().unwrap();
        if !endpoints.contains_key(name) {
            return Ok(());
        }
        self.take_injected_failure(name)?;
        endpoints.remove(name);
        drop(endpoints);
        self.record_write("endpoint/delete", name);
        Ok(())
    }

    async fn delete_peering_request(&self, name: &str) -> Result<(), StoreError> {
        let mut requests = self.peering_requests.lock().unwrap();
        if !requests.contains(name) {
            return Ok(());
        }
        self.take_injected_failure(name)?;
        requests.remove(name);
        drop(requests);
        self.record_write("peeringrequest/delete", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ResourceOfferSpec, TUNNEL_ENDPOINT_FINALIZER};

    fn offer(name: &str) -> ResourceOffer {
        ResourceOffer::new(name, ResourceOfferSpec {
            cluster_id: "cluster-a".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MockPeeringStore::new("peering");
        let stored = store.add_offer(offer("adv"));

        let mut first = stored.clone();
        first.set_offer_status(crds::OfferStatus::Accepted);
        store.set_offer_status(&first).await.unwrap();

        let mut stale = stored;
        stale.set_offer_status(crds::OfferStatus::Refused);
        let err = store.set_offer_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_then_removes() {
        let store = MockPeeringStore::new("peering");
        let mut adv = offer("adv");
        adv.metadata.finalizers = Some(vec![TUNNEL_ENDPOINT_FINALIZER.to_string()]);
        store.add_offer(adv);

        store.delete_offer("adv").await.unwrap();
        let mut marked = store.offer("adv").unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        marked.metadata.finalizers = Some(vec![]);
        store.set_offer_finalizers(&marked).await.unwrap();
        assert!(store.offer("adv").is_none());
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let store = MockPeeringStore::new("peering");
        store.delete_offer("missing").await.unwrap();
        store.delete_tunnel_endpoint("missing").await.unwrap();
        store.delete_peering_request("missing").await.unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_create_drops_status_and_rejects_duplicates() {
        let store = MockPeeringStore::new("peering");
        let endpoint = TunnelEndpoint {
            metadata: ObjectMeta {
                name: Some("cluster-a-tunendpoint".to_string()),
                ..Default::default()
            },
            spec: Default::default(),
            status: Some(Default::default()),
        };
        let created = store.create_tunnel_endpoint(&endpoint).await.unwrap();
        assert!(created.status.is_none());
        assert!(store.create_tunnel_endpoint(&endpoint).await.unwrap_err().is_conflict());
    }

    #[test]
    fn test_merge_patch_removes_nulls_and_keeps_omitted_fields() {
        let mut target = serde_json::json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge_patch(&mut target, &serde_json::json!({"a": null, "b": {"c": 4}}));
        assert_eq!(target, serde_json::json!({"b": {"c": 4, "d": 3}}));
    }

    #[tokio::test]
    async fn test_status_write_clears_unset_fields() {
        let store = MockPeeringStore::new("peering");
        let mut adv = store.add_offer(offer("adv"));
        adv.status = Some(crds::ResourceOfferStatus {
            offer_status: crds::OfferStatus::Accepted,
            remote_remapped_pod_cidr: Some(crds::NO_REMAP.to_string()),
            tunnel_endpoint_key: Some(crds::ObjectKey::new("cluster-a-tunendpoint", "peering")),
            ..Default::default()
        });
        let mut adv = store.set_offer_status(&adv).await.unwrap();

        let status = adv.status.as_mut().unwrap();
        status.offer_status = crds::OfferStatus::Refused;
        status.remote_remapped_pod_cidr = None;
        status.tunnel_endpoint_key = None;
        store.set_offer_status(&adv).await.unwrap();

        let status = store.offer("adv").unwrap().status.unwrap();
        assert_eq!(status.offer_status, crds::OfferStatus::Refused);
        assert_eq!(status.remote_remapped_pod_cidr, None);
        assert_eq!(status.tunnel_endpoint_key, None);
    }
}
