use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use super::{manifests, names, ownership, service::pod_selector};
use crate::error::{FleetOperatorError, FleetOperatorResult};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

/// Allows DNS and metrics traffic in and anything out of the resolver pods.
pub fn desired_network_policy(
    dns: &ClusterDns,
    params: &RuntimeParams,
) -> FleetOperatorResult<NetworkPolicy> {
    let dns_name = dns.name_any();
    let mut policy = manifests::network_policy()?;
    policy.metadata.name = Some(names::network_policy_name(&dns_name));
    policy.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut policy, dns);

    let spec = policy
        .spec
        .as_mut()
        .ok_or_else(|| FleetOperatorError::template("network-policy.yaml", "missing spec"))?;
    spec.pod_selector = LabelSelector {
        match_labels: Some(pod_selector(&dns_name)),
        ..Default::default()
    };
    Ok(policy)
}

pub fn network_policy_changed(
    current: &NetworkPolicy,
    desired: &NetworkPolicy,
) -> Option<NetworkPolicy> {
    if current.spec == desired.spec {
        return None;
    }
    let mut updated = current.clone();
    updated.spec = desired.spec.clone();
    Some(updated)
}
