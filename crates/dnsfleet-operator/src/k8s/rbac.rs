//! Operand namespace and access control objects.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::Resource;

use super::{compare, manifests, ownership};
use crate::error::{FleetOperatorError, FleetOperatorResult};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

fn mark_managed<K: Resource>(obj: &mut K) {
    obj.meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(ownership::managed_labels());
}

/// `current` with every entry of `desired` added; `None` when nothing is missing.
fn with_entries(
    current: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let desired = desired.as_ref()?;
    let current = current.clone().unwrap_or_default();
    if desired.iter().all(|(k, v)| current.get(k) == Some(v)) {
        return None;
    }
    let mut merged = current;
    merged.extend(desired.clone());
    Some(merged)
}

pub fn desired_namespace(params: &RuntimeParams) -> FleetOperatorResult<Namespace> {
    let mut namespace = manifests::namespace()?;
    namespace.metadata.name = Some(params.operand_namespace.clone());
    mark_managed(&mut namespace);
    Ok(namespace)
}

/// Namespaces collect labels and annotations from many actors, so only missing
/// or different entries are written back.
pub fn namespace_changed(current: &Namespace, desired: &Namespace) -> Option<Namespace> {
    let labels = with_entries(&current.metadata.labels, &desired.metadata.labels);
    let annotations = with_entries(&current.metadata.annotations, &desired.metadata.annotations);
    if labels.is_none() && annotations.is_none() {
        return None;
    }
    let mut updated = current.clone();
    if labels.is_some() {
        updated.metadata.labels = labels;
    }
    if annotations.is_some() {
        updated.metadata.annotations = annotations;
    }
    Some(updated)
}

pub fn desired_service_account(params: &RuntimeParams) -> FleetOperatorResult<ServiceAccount> {
    let mut account = manifests::service_account()?;
    account.metadata.namespace = Some(params.operand_namespace.clone());
    mark_managed(&mut account);
    Ok(account)
}

/// Token and pull secrets are managed by the platform; only labels are ours.
pub fn service_account_changed(
    current: &ServiceAccount,
    desired: &ServiceAccount,
) -> Option<ServiceAccount> {
    let labels = with_entries(&current.metadata.labels, &desired.metadata.labels)?;
    let mut updated = current.clone();
    updated.metadata.labels = Some(labels);
    Some(updated)
}

pub fn desired_cluster_role() -> FleetOperatorResult<ClusterRole> {
    let mut role = manifests::cluster_role()?;
    mark_managed(&mut role);
    Ok(role)
}

pub fn cluster_role_changed(current: &ClusterRole, desired: &ClusterRole) -> Option<ClusterRole> {
    if compare::list_eq(&current.rules, &desired.rules) {
        return None;
    }
    let mut updated = current.clone();
    updated.rules = desired.rules.clone();
    Some(updated)
}

pub fn desired_cluster_role_binding(
    params: &RuntimeParams,
) -> FleetOperatorResult<ClusterRoleBinding> {
    let mut binding = manifests::cluster_role_binding()?;
    let subject = binding
        .subjects
        .as_mut()
        .and_then(|subjects| subjects.first_mut())
        .ok_or_else(|| FleetOperatorError::template("cluster-role-binding.yaml", "no subject"))?;
    subject.namespace = Some(params.operand_namespace.clone());
    mark_managed(&mut binding);
    Ok(binding)
}

pub fn cluster_role_binding_changed(
    current: &ClusterRoleBinding,
    desired: &ClusterRoleBinding,
) -> Option<ClusterRoleBinding> {
    if current.role_ref == desired.role_ref && compare::list_eq(&current.subjects, &desired.subjects)
    {
        return None;
    }
    let mut updated = current.clone();
    updated.role_ref = desired.role_ref.clone();
    updated.subjects = desired.subjects.clone();
    Some(updated)
}

/// Lets the monitoring stack discover and scrape the operand namespace.
pub fn desired_metrics_role(dns: &ClusterDns, params: &RuntimeParams) -> FleetOperatorResult<Role> {
    let mut role = manifests::metrics_role()?;
    role.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut role, dns);
    Ok(role)
}

pub fn metrics_role_changed(current: &Role, desired: &Role) -> Option<Role> {
    if compare::list_eq(&current.rules, &desired.rules) {
        return None;
    }
    let mut updated = current.clone();
    updated.rules = desired.rules.clone();
    Some(updated)
}

pub fn desired_metrics_role_binding(
    dns: &ClusterDns,
    params: &RuntimeParams,
) -> FleetOperatorResult<RoleBinding> {
    let mut binding = manifests::metrics_role_binding()?;
    binding.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut binding, dns);
    Ok(binding)
}

pub fn metrics_role_binding_changed(
    current: &RoleBinding,
    desired: &RoleBinding,
) -> Option<RoleBinding> {
    if current.role_ref == desired.role_ref && compare::list_eq(&current.subjects, &desired.subjects)
    {
        return None;
    }
    let mut updated = current.clone();
    updated.role_ref = desired.role_ref.clone();
    updated.subjects = desired.subjects.clone();
    Some(updated)
}
