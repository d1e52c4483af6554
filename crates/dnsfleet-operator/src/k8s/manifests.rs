//! Static object templates compiled into the binary.

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use serde::de::DeserializeOwned;

use super::service_monitor::ServiceMonitor;
use crate::error::{FleetOperatorError, FleetOperatorResult};

const NAMESPACE: &str = include_str!("../../manifests/namespace.yaml");
const SERVICE_ACCOUNT: &str = include_str!("../../manifests/service-account.yaml");
const CLUSTER_ROLE: &str = include_str!("../../manifests/cluster-role.yaml");
const CLUSTER_ROLE_BINDING: &str = include_str!("../../manifests/cluster-role-binding.yaml");
const METRICS_ROLE: &str = include_str!("../../manifests/metrics-role.yaml");
const METRICS_ROLE_BINDING: &str = include_str!("../../manifests/metrics-role-binding.yaml");
const DAEMONSET: &str = include_str!("../../manifests/daemonset.yaml");
const SERVICE: &str = include_str!("../../manifests/service.yaml");
const NETWORK_POLICY: &str = include_str!("../../manifests/network-policy.yaml");
const SERVICE_MONITOR: &str = include_str!("../../manifests/service-monitor.yaml");

fn parse<K: DeserializeOwned>(template: &str, source: &str) -> FleetOperatorResult<K> {
    serde_yaml::from_str(source)
        .map_err(|err| FleetOperatorError::template(template, err.to_string()))
}

pub fn namespace() -> FleetOperatorResult<Namespace> {
    parse("namespace.yaml", NAMESPACE)
}

pub fn service_account() -> FleetOperatorResult<ServiceAccount> {
    parse("service-account.yaml", SERVICE_ACCOUNT)
}

pub fn cluster_role() -> FleetOperatorResult<ClusterRole> {
    parse("cluster-role.yaml", CLUSTER_ROLE)
}

pub fn cluster_role_binding() -> FleetOperatorResult<ClusterRoleBinding> {
    parse("cluster-role-binding.yaml", CLUSTER_ROLE_BINDING)
}

pub fn metrics_role() -> FleetOperatorResult<Role> {
    parse("metrics-role.yaml", METRICS_ROLE)
}

pub fn metrics_role_binding() -> FleetOperatorResult<RoleBinding> {
    parse("metrics-role-binding.yaml", METRICS_ROLE_BINDING)
}

pub fn daemonset() -> FleetOperatorResult<DaemonSet> {
    parse("daemonset.yaml", DAEMONSET)
}

pub fn service() -> FleetOperatorResult<Service> {
    parse("service.yaml", SERVICE)
}

pub fn network_policy() -> FleetOperatorResult<NetworkPolicy> {
    parse("network-policy.yaml", NETWORK_POLICY)
}

pub fn service_monitor() -> FleetOperatorResult<ServiceMonitor> {
    parse("service-monitor.yaml", SERVICE_MONITOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        assert!(namespace().is_ok());
        assert!(service_account().is_ok());
        assert_eq!(cluster_role().unwrap().rules.unwrap().len(), 4);
        assert!(cluster_role_binding().is_ok());
        assert!(metrics_role().is_ok());
        assert!(metrics_role_binding().is_ok());
        assert_eq!(service().unwrap().spec.unwrap().ports.unwrap().len(), 3);
        assert!(network_policy().is_ok());
        assert_eq!(service_monitor().unwrap().spec.endpoints.len(), 1);

        let ds = daemonset().unwrap();
        let pod = ds.spec.unwrap().template.spec.unwrap();
        let containers: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(containers, ["dns", "dns-node-resolver", "metrics-proxy"]);
    }

    #[test]
    fn test_template_error_is_not_retryable() {
        let err = parse::<DaemonSet>("broken.yaml", "spec: [").unwrap_err();
        assert!(matches!(err, FleetOperatorError::Template { .. }));
        assert!(!err.is_retryable());
    }
}
