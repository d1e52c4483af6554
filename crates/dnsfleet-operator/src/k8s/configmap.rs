use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use super::{compare, corefile::corefile, names, ownership};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

/// The config map holding the rendered Corefile.
pub fn desired_configmap(dns: &ClusterDns, params: &RuntimeParams) -> ConfigMap {
    let mut cm = ConfigMap {
        data: Some(BTreeMap::from([(
            names::COREFILE_KEY.to_string(),
            corefile(dns, params),
        )])),
        ..Default::default()
    };
    cm.metadata.name = Some(names::configmap_name(&dns.name_any()));
    cm.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut cm, dns);
    cm
}

pub fn configmap_changed(current: &ConfigMap, desired: &ConfigMap) -> Option<ConfigMap> {
    if compare::map_eq(&current.data, &desired.data) {
        return None;
    }
    let mut updated = current.clone();
    updated.data = desired.data.clone();
    Some(updated)
}
