//! The subset of the monitoring stack's `ServiceMonitor` the operator sets.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::{manifests, names, ownership};
use crate::error::FleetOperatorResult;
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
    #[serde(default)]
    pub selector: LabelSelector,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<EndpointTls>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub match_names: Vec<String>,
}

pub fn desired_service_monitor(
    dns: &ClusterDns,
    params: &RuntimeParams,
) -> FleetOperatorResult<ServiceMonitor> {
    let dns_name = dns.name_any();
    let mut monitor = manifests::service_monitor()?;
    monitor.metadata.name = Some(names::service_monitor_name(&dns_name));
    monitor.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut monitor, dns);

    let server_name = format!(
        "{}.{}.svc",
        names::service_name(&dns_name),
        params.operand_namespace
    );
    for endpoint in &mut monitor.spec.endpoints {
        endpoint
            .tls_config
            .get_or_insert_with(EndpointTls::default)
            .server_name = Some(server_name.clone());
    }
    monitor.spec.namespace_selector = Some(NamespaceSelector {
        match_names: vec![params.operand_namespace.clone()],
    });
    monitor.spec.selector = LabelSelector {
        match_labels: Some(ownership::scoping_labels(&dns_name)),
        ..Default::default()
    };
    Ok(monitor)
}

/// The monitoring stack may rewrite anything outside `spec`, so only the spec
/// is compared.
pub fn service_monitor_changed(
    current: &ServiceMonitor,
    desired: &ServiceMonitor,
) -> Option<ServiceMonitor> {
    if current.spec == desired.spec {
        return None;
    }
    let mut updated = current.clone();
    updated.spec = desired.spec.clone();
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::{dns, params};

    #[test]
    fn test_desired_service_monitor() {
        let monitor = desired_service_monitor(&dns(), &params()).unwrap();
        assert_eq!(monitor.metadata.name.as_deref(), Some("dns-default"));
        assert!(ownership::is_owned_by(&monitor, "default"));

        let endpoint = &monitor.spec.endpoints[0];
        assert_eq!(endpoint.port.as_deref(), Some("metrics"));
        assert_eq!(
            endpoint.tls_config.as_ref().unwrap().server_name.as_deref(),
            Some("dns-default.dnsfleet-dns.svc")
        );
    }

    #[test]
    fn test_service_monitor_changed_fixed_point() {
        let desired = desired_service_monitor(&dns(), &params()).unwrap();
        let mut current = desired.clone();
        current.spec.endpoints[0].interval = Some("5m".to_string());
        current.metadata.resource_version = Some("7".to_string());

        let merged = service_monitor_changed(&current, &desired).unwrap();
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("7"));
        assert!(service_monitor_changed(&merged, &desired).is_none());
        assert!(service_monitor_changed(&desired, &desired).is_none());
    }
}
