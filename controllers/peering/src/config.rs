//! Process configuration read from the environment.

use crate::error::ControllerError;
use ipam::{SubnetPool, parse_cidr};
use ipnet::Ipv4Net;
use std::net::SocketAddr;
use tracing::info;

const DEFAULT_SUBNET_POOL_CIDR: &str = "10.0.0.0/8";
const DEFAULT_SUBNET_POOL_PREFIX_LEN: u8 = 16;
const DEFAULT_CLUSTER_CONFIG_NAME: &str = "cluster-config";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace holding offers and derived tunnel endpoints
    pub namespace: String,
    /// Local pod CIDR, reserved in the subnet pool
    pub pod_cidr: Ipv4Net,
    /// Local service CIDR, reserved in the subnet pool
    pub service_cidr: Ipv4Net,
    /// Super-block remapped subnets are carved from
    pub subnet_pool_cidr: Ipv4Net,
    /// Prefix length of each remapped subnet
    pub subnet_pool_prefix_len: u8,
    /// Name of the cluster-scoped ClusterConfig object
    pub cluster_config_name: String,
    /// This cluster's ID; with `foreign_cluster_id`, enables the sharing policy
    pub local_cluster_id: Option<String>,
    /// Peer receiving this cluster's offer
    pub foreign_cluster_id: Option<String>,
    /// Bind address of the probes/metrics server
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!("{} environment variable is required", key))
                })
        };
        let cidr = |key: &str, value: &str| {
            parse_cidr(value).map_err(|e| ControllerError::InvalidConfig(format!("{}: {}", key, e)))
        };

        let namespace = required("POD_NAMESPACE")?;
        let pod_cidr = cidr("POD_CIDR", &required("POD_CIDR")?)?;
        let service_cidr = cidr("SERVICE_CIDR", &required("SERVICE_CIDR")?)?;

        let subnet_pool_cidr = cidr(
            "SUBNET_POOL_CIDR",
            &lookup("SUBNET_POOL_CIDR").unwrap_or_else(|| DEFAULT_SUBNET_POOL_CIDR.to_string()),
        )?;
        let subnet_pool_prefix_len = match lookup("SUBNET_POOL_PREFIX_LEN") {
            Some(value) => value.parse::<u8>().map_err(|e| {
                ControllerError::InvalidConfig(format!("SUBNET_POOL_PREFIX_LEN {:?}: {}", value, e))
            })?,
            None => DEFAULT_SUBNET_POOL_PREFIX_LEN,
        };

        let metrics_addr = lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_ADDR {:?}: {}", metrics_addr, e))
        })?;

        Ok(Self {
            namespace,
            pod_cidr,
            service_cidr,
            subnet_pool_cidr,
            subnet_pool_prefix_len,
            cluster_config_name: lookup("CLUSTER_CONFIG_NAME")
                .unwrap_or_else(|| DEFAULT_CLUSTER_CONFIG_NAME.to_string()),
            local_cluster_id: lookup("LOCAL_CLUSTER_ID").filter(|v| !v.is_empty()),
            foreign_cluster_id: lookup("FOREIGN_CLUSTER_ID").filter(|v| !v.is_empty()),
            metrics_addr,
        })
    }

    /// Builds the subnet pool and reserves the local pod and service CIDRs.
    pub fn subnet_pool(&self) -> Result<SubnetPool, ControllerError> {
        let mut pool = SubnetPool::new(self.subnet_pool_cidr, self.subnet_pool_prefix_len)?;
        pool.seed(&[self.pod_cidr, self.service_cidr])?;
        Ok(pool)
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.namespace);
        info!("  Pod CIDR: {}", self.pod_cidr);
        info!("  Service CIDR: {}", self.service_cidr);
        info!("  Subnet pool: {} in /{} blocks", self.subnet_pool_cidr, self.subnet_pool_prefix_len);
        info!("  ClusterConfig: {}", self.cluster_config_name);
        match (&self.local_cluster_id, &self.foreign_cluster_id) {
            (Some(local), Some(foreign)) => info!("  Sharing: {} -> {}", local, foreign),
            _ => info!("  Sharing policy: disabled"),
        }
        info!("  Metrics: {}", self.metrics_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("POD_NAMESPACE", "liqo"),
        ("POD_CIDR", "10.244.0.0/16"),
        ("SERVICE_CIDR", "10.96.0.0/12"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.namespace, "liqo");
        assert_eq!(config.subnet_pool_cidr, "10.0.0.0/8".parse::<Ipv4Net>().unwrap());
        assert_eq!(config.subnet_pool_prefix_len, 16);
        assert_eq!(config.cluster_config_name, "cluster-config");
        assert_eq!(config.local_cluster_id, None);
        assert_eq!(config.metrics_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_missing_namespace_is_fatal() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("POD_NAMESPACE")));
    }

    #[test]
    fn test_malformed_cidr_is_fatal() {
        let mut vars = REQUIRED.to_vec();
        vars[1] = ("POD_CIDR", "10.244.0.0");
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("POD_CIDR")));
    }

    #[test]
    fn test_subnet_pool_reserves_local_cidrs() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        let pool = config.subnet_pool().unwrap();
        assert!(pool.is_used(&"10.244.0.0/16".parse().unwrap()));
        assert!(pool.conflicts(&"10.100.0.0/16".parse().unwrap()));
        assert!(!pool.conflicts(&"10.1.0.0/16".parse().unwrap()));
    }
}
