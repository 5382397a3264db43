//! Integration tests for the Kubernetes-backed store
//!
//! These tests require a reachable cluster with the peering CRDs installed.
//! Set PEERING_TEST_NAMESPACE to pick the namespace (default: "peering-test").

use crds::{ResourceOffer, ResourceOfferSpec, TunnelEndpoint, TunnelEndpointSpec, OfferStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use peering_client::{KubeStore, PeeringStore};

async fn store() -> KubeStore {
    let namespace = std::env::var("PEERING_TEST_NAMESPACE")
        .unwrap_or_else(|_| "peering-test".to_string());
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create Kubernetes client");
    KubeStore::new(client, namespace)
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_list_offers() {
    let store = store().await;
    let offers = store.list_offers().await.expect("Failed to list offers");
    println!("Found {} offers", offers.len());
}

#[tokio::test]
#[ignore]
async fn test_missing_objects_are_not_found() {
    let store = store().await;
    let err = store
        .get_offer("does-not-exist")
        .await
        .expect_err("offer should not exist");
    assert!(err.is_not_found());

    // Deleting something that is already gone succeeds
    store
        .delete_tunnel_endpoint("does-not-exist-tunendpoint")
        .await
        .expect("Delete of missing endpoint should succeed");
}

#[tokio::test]
#[ignore]
async fn test_stale_status_write_conflicts() {
    let store = store().await;
    let offer = ResourceOffer::new("integration-offer", ResourceOfferSpec {
        cluster_id: "integration-cluster".to_string(),
        ..Default::default()
    });
    let created = store
        .offer_api()
        .create(&Default::default(), &offer)
        .await
        .expect("Failed to create offer");

    let mut first = created.clone();
    first.set_offer_status(OfferStatus::Accepted);
    store.set_offer_status(&first).await.expect("First status write failed");

    let mut stale = created;
    stale.set_offer_status(OfferStatus::Refused);
    let err = store.set_offer_status(&stale).await.expect_err("stale write should fail");
    assert!(err.is_conflict());

    store.delete_offer("integration-offer").await.expect("Failed to delete offer");
}

#[tokio::test]
#[ignore]
async fn test_create_and_delete_tunnel_endpoint() {
    let store = store().await;
    let endpoint = TunnelEndpoint {
        metadata: ObjectMeta {
            name: Some("integration-cluster-tunendpoint".to_string()),
            ..Default::default()
        },
        spec: TunnelEndpointSpec {
            cluster_id: "integration-cluster".to_string(),
            pod_cidr: "10.244.0.0/16".to_string(),
            tunnel_public_ip: "192.0.2.10".to_string(),
            tunnel_private_ip: "10.0.0.10".to_string(),
        },
        status: None,
    };

    let created = store
        .create_tunnel_endpoint(&endpoint)
        .await
        .expect("Failed to create endpoint");
    assert_eq!(created.spec, endpoint.spec);

    store
        .delete_tunnel_endpoint("integration-cluster-tunendpoint")
        .await
        .expect("Failed to delete endpoint");
}
