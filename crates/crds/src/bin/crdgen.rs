//! Prints the peering CRD manifests as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crds.yaml`

use crds::{ClusterConfig, PeeringRequest, ResourceOffer, TunnelEndpoint};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        ResourceOffer::crd(),
        TunnelEndpoint::crd(),
        PeeringRequest::crd(),
        ClusterConfig::crd(),
    ];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
