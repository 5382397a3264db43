//! Test utilities for unit testing reconcilers
//!
//! Helpers for creating test offers and a reconciler wired to a
//! `MockPeeringStore`.

use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::admission::AdmissionPolicy;
use crds::{NetworkConfig, OfferStatus, ResourceOffer, ResourceOfferSpec, ResourceOfferStatus};
use ipam::{SharedSubnetPool, SubnetPool};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use peering_client::MockPeeringStore;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "liqo";
pub const LOCAL_POD_CIDR: &str = "10.200.0.0/16";
pub const LOCAL_SERVICE_CIDR: &str = "10.96.0.0/12";

/// Helper to create a Pending test offer
pub fn test_offer(name: &str, cluster_id: &str, pod_cidr: &str) -> ResourceOffer {
    ResourceOffer {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ResourceOfferSpec {
            cluster_id: cluster_id.to_string(),
            network: NetworkConfig {
                pod_cidr: pod_cidr.to_string(),
                gateway_ip: "192.0.2.1".to_string(),
                gateway_private_ip: "10.250.0.1".to_string(),
            },
            resource_quota: BTreeMap::from([
                ("cpu".to_string(), "4".to_string()),
                ("memory".to_string(), "8Gi".to_string()),
            ]),
            time_to_live: None,
        },
        status: None,
    }
}

/// Helper to create a test offer with the given admission status
pub fn offer_with_status(name: &str, status: OfferStatus) -> ResourceOffer {
    let mut offer = test_offer(name, &format!("cluster-{}", name), "10.244.0.0/16");
    offer.status = Some(ResourceOfferStatus {
        offer_status: status,
        ..Default::default()
    });
    offer
}

/// `count` offers named offer-0, offer-1, ... with the given status
pub fn offers_with_status(count: usize, status: OfferStatus) -> Vec<ResourceOffer> {
    (0..count)
        .map(|i| offer_with_status(&format!("offer-{}", i), status))
        .collect()
}

/// Helper to create a subnet pool over 10.0.0.0/8 seeded with the local CIDRs
pub fn test_pool() -> SharedSubnetPool {
    let mut pool = SubnetPool::new("10.0.0.0/8".parse().unwrap(), 16).unwrap();
    pool.seed(&[LOCAL_POD_CIDR.parse().unwrap(), LOCAL_SERVICE_CIDR.parse().unwrap()])
        .unwrap();
    SharedSubnetPool::new(pool)
}

pub fn test_metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().unwrap())
}

/// Helper to create a reconciler backed by `store`
pub fn test_reconciler(store: &MockPeeringStore, policy: AdmissionPolicy) -> Reconciler {
    Reconciler::new(Arc::new(store.clone()), test_pool(), policy, test_metrics())
}

/// Reconciles the stored version of `name` until it stops changing or
/// `max_rounds` is reached. Returns the number of rounds that wrote.
pub async fn drive(reconciler: &Reconciler, store: &MockPeeringStore, name: &str, max_rounds: usize) -> usize {
    let mut rounds = 0;
    for _ in 0..max_rounds {
        let Some(offer) = store.offer(name) else {
            break;
        };
        let before = store.write_count();
        reconciler.reconcile_offer(&offer).await.unwrap();
        if store.write_count() == before {
            break;
        }
        rounds += 1;
    }
    rounds
}
