use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use super::names::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNING_DNS_LABEL};
use crate::error::{FleetOperatorError, FleetOperatorResult};
use crate::operator::crd::ClusterDns;

/// Controller reference to the cluster DNS; deleting the DNS cascades to the child.
pub fn owner_reference(dns: &ClusterDns) -> OwnerReference {
    OwnerReference {
        api_version: ClusterDns::api_version(&()).to_string(),
        kind: ClusterDns::kind(&()).to_string(),
        name: dns.name_any(),
        uid: dns.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn scoping_labels(dns_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(OWNING_DNS_LABEL.to_string(), dns_name.to_string())])
}

pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

/// Sets the owner link and the scoping label, leaving other labels alone.
pub fn set_owned<K: Resource>(obj: &mut K, dns: &ClusterDns) {
    let meta = obj.meta_mut();
    meta.owner_references = Some(vec![owner_reference(dns)]);
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(scoping_labels(&dns.name_any()));
}

/// Whether `obj` carries the scoping label of the DNS named `dns_name`.
pub fn is_owned_by<K: Resource>(obj: &K, dns_name: &str) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(OWNING_DNS_LABEL))
        .map_or(false, |owner| owner == dns_name)
}

fn manager<K: Resource>(obj: &K) -> Option<&String> {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
}

/// Whether `obj` was created by this operator as shared scaffolding.
pub fn is_managed<K: Resource>(obj: &K) -> bool {
    manager(obj).map_or(false, |manager| manager == MANAGED_BY_VALUE)
}

fn display_key<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(namespace) => format!("{}/{}", namespace, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Unlabeled scaffolding is adopted; scaffolding another manager claims is not.
pub fn check_manageable<K: Resource<DynamicType = ()>>(obj: &K) -> FleetOperatorResult {
    match manager(obj) {
        Some(manager) if manager != MANAGED_BY_VALUE => Err(FleetOperatorError::NotManaged {
            kind: K::kind(&()).to_string(),
            key: display_key(obj),
            manager: manager.clone(),
        }),
        _ => Ok(()),
    }
}

/// Fails with [`FleetOperatorError::NotOwned`] for an object that a name
/// collision put in the way.
pub fn check_owned<K: Resource<DynamicType = ()>>(obj: &K, dns_name: &str) -> FleetOperatorResult {
    if is_owned_by(obj, dns_name) {
        return Ok(());
    }
    Err(FleetOperatorError::NotOwned {
        kind: K::kind(&()).to_string(),
        key: display_key(obj),
        owner: dns_name.to_string(),
    })
}
