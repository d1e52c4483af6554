use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{compare, manifests, names, ownership};
use crate::error::{FleetOperatorError, FleetOperatorResult};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

/// Pod selector shared by the service, the network policy and the daemonset.
pub fn pod_selector(dns_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(names::DAEMONSET_DNS_LABEL.to_string(), dns_name.to_string())])
}

pub fn desired_service(dns: &ClusterDns, params: &RuntimeParams) -> FleetOperatorResult<Service> {
    let dns_name = dns.name_any();
    let mut service = manifests::service()?;
    service.metadata.name = Some(names::service_name(&dns_name));
    service.metadata.namespace = Some(params.operand_namespace.clone());
    service.metadata.annotations = Some(BTreeMap::from([(
        names::SERVING_CERT_ANNOTATION.to_string(),
        names::metrics_secret_name(&dns_name),
    )]));
    ownership::set_owned(&mut service, dns);

    let spec = service
        .spec
        .as_mut()
        .ok_or_else(|| FleetOperatorError::template("service.yaml", "missing spec"))?;
    spec.selector = Some(pod_selector(&dns_name));
    spec.cluster_ip = Some(params.cluster_ip.clone());
    Ok(service)
}

fn normalize_port(port: &ServicePort) -> ServicePort {
    let mut port = port.clone();
    port.protocol.get_or_insert_with(|| "TCP".to_string());
    port.target_port.get_or_insert(IntOrString::Int(port.port));
    port.node_port = None;
    port
}

fn ports_eq(a: Option<&Vec<ServicePort>>, b: Option<&Vec<ServicePort>>) -> bool {
    let a = a.map(Vec::as_slice).unwrap_or_default();
    let b = b.map(Vec::as_slice).unwrap_or_default();
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(a, b)| normalize_port(a) == normalize_port(b))
}

fn serving_cert(service: &Service) -> Option<&String> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(names::SERVING_CERT_ANNOTATION))
}

/// Compares the selector, the ports and the serving certificate annotation.
/// The cluster IP is immutable once allocated and is never touched.
pub fn service_changed(current: &Service, desired: &Service) -> Option<Service> {
    let current_spec = current.spec.clone().unwrap_or_default();
    let desired_spec = desired.spec.clone().unwrap_or_default();

    let selector_same = compare::map_eq(&current_spec.selector, &desired_spec.selector);
    let ports_same = ports_eq(current_spec.ports.as_ref(), desired_spec.ports.as_ref());
    let cert_same = serving_cert(current) == serving_cert(desired);
    if selector_same && ports_same && cert_same {
        return None;
    }

    let mut updated = current.clone();
    let spec = updated.spec.get_or_insert_with(Default::default);
    spec.selector = desired_spec.selector;
    spec.ports = desired_spec.ports;
    match serving_cert(desired) {
        Some(secret) => {
            updated
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(names::SERVING_CERT_ANNOTATION.to_string(), secret.clone());
        }
        None => {
            if let Some(annotations) = updated.metadata.annotations.as_mut() {
                annotations.remove(names::SERVING_CERT_ANNOTATION);
            }
        }
    }
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::{dns, params};

    #[test]
    fn test_desired_service() {
        let service = desired_service(&dns(), &params()).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("dns-default"));
        assert_eq!(
            serving_cert(&service).map(String::as_str),
            Some("dns-default-metrics-tls")
        );
        let spec = service.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("172.30.0.10"));
        assert_eq!(
            spec.selector.unwrap()[names::DAEMONSET_DNS_LABEL],
            "default"
        );
    }

    #[test]
    fn test_defaults_filled_by_server_are_ignored() {
        let desired = desired_service(&dns(), &params()).unwrap();
        let mut current = desired.clone();
        let spec = current.spec.as_mut().unwrap();
        spec.session_affinity = Some("None".to_string());
        spec.cluster_ips = Some(vec!["172.30.0.10".to_string()]);
        for port in spec.ports.as_mut().unwrap() {
            port.protocol.get_or_insert_with(|| "TCP".to_string());
        }
        assert!(service_changed(&current, &desired).is_none());
    }

    #[test]
    fn test_service_changed_fixed_point() {
        let desired = desired_service(&dns(), &params()).unwrap();
        let mut current = desired.clone();
        current.spec.as_mut().unwrap().selector =
            Some(BTreeMap::from([("app".to_string(), "other".to_string())]));
        current.spec.as_mut().unwrap().ports.as_mut().unwrap().pop();
        current.metadata.annotations = None;

        let merged = service_changed(&current, &desired).unwrap();
        assert_eq!(merged.spec.as_ref().unwrap().ports.as_ref().unwrap().len(), 3);
        assert!(serving_cert(&merged).is_some());
        assert!(service_changed(&merged, &desired).is_none());
    }
}
