//! Get-or-create-or-update for each child kind of a cluster DNS.

mod ca_bundle;

pub use ca_bundle::{delete_ca_copies, prune_ca_copies, sync_ca_bundles};

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::crd::ClusterDns;
use crate::error::FleetOperatorResult;
use crate::k8s::{configmap, daemonset, names, network_policy, ownership, rbac, service, service_monitor};
use crate::params::RuntimeParams;
use crate::store::{Managed, ObjectKey, ObjectStore};

/// Which existing objects the operator may modify.
#[derive(Debug, Clone, Copy)]
pub enum Claim<'a> {
    /// Per-DNS children: only objects carrying the scoping label of this DNS.
    Owned(&'a str),
    /// Shared scaffolding: anything not claimed by a different manager.
    Managed,
}

impl Claim<'_> {
    fn check<K: Managed>(&self, current: &K) -> FleetOperatorResult {
        match self {
            Claim::Owned(dns_name) => ownership::check_owned(current, dns_name),
            Claim::Managed => ownership::check_manageable(current),
        }
    }
}

/// Creates `desired` when absent, otherwise updates the live object with the
/// fields `changed` reports as drifted. Returns the live object.
pub async fn converge<S, K>(
    store: &S,
    desired: K,
    changed: fn(&K, &K) -> Option<K>,
    claim: Claim<'_>,
) -> FleetOperatorResult<K>
where
    S: ObjectStore,
    K: Managed,
{
    let key = ObjectKey::of(&desired);
    let kind = K::kind(&());
    let Some(current) = store.get::<K>(&key).await? else {
        let created = store.create(&desired).await?;
        info!(kind = %kind, key = %key, "created");
        return Ok(created);
    };

    claim.check(&current)?;
    match changed(&current, &desired) {
        Some(updated) => {
            // Carries the fetched resourceVersion, so a concurrent write fails with 409.
            let updated = store.update(&updated).await?;
            info!(kind = %kind, key = %key, "updated");
            Ok(updated)
        }
        None => {
            debug!(kind = %kind, key = %key, "up to date");
            Ok(current)
        }
    }
}

/// Operand namespace, service account, cluster role and its binding.
pub async fn ensure_scaffolding<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
) -> FleetOperatorResult {
    converge(
        store,
        rbac::desired_namespace(params)?,
        rbac::namespace_changed,
        Claim::Managed,
    )
    .await?;
    converge(
        store,
        rbac::desired_service_account(params)?,
        rbac::service_account_changed,
        Claim::Managed,
    )
    .await?;
    converge(
        store,
        rbac::desired_cluster_role()?,
        rbac::cluster_role_changed,
        Claim::Managed,
    )
    .await?;
    converge(
        store,
        rbac::desired_cluster_role_binding(params)?,
        rbac::cluster_role_binding_changed,
        Claim::Managed,
    )
    .await?;
    Ok(())
}

/// Deletes the standalone node resolver daemonset that older releases ran next
/// to the resolver. It is never recreated. Returns whether it was deleted.
pub async fn remove_legacy_node_resolver<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns_name: &str,
) -> FleetOperatorResult<bool> {
    let key = ObjectKey::namespaced(&params.operand_namespace, names::LEGACY_NODE_RESOLVER);
    let Some(legacy) = store.get::<DaemonSet>(&key).await? else {
        return Ok(false);
    };
    if !ownership::is_owned_by(&legacy, dns_name) {
        debug!(key = %key, "leaving unowned node resolver daemonset alone");
        return Ok(false);
    }
    let deleted = store.delete::<DaemonSet>(&key).await?;
    if deleted {
        info!(key = %key, "deleted legacy node resolver daemonset");
    }
    Ok(deleted)
}

pub async fn ensure_daemonset<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<DaemonSet> {
    let dns_name = dns.name_any();
    converge(
        store,
        daemonset::desired_daemonset(dns, params)?,
        daemonset::daemonset_changed,
        Claim::Owned(&dns_name),
    )
    .await
}

/// Refuses to render a Corefile for a spec the resolver would reject; the
/// running configuration stays in place.
pub async fn ensure_configmap<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<ConfigMap> {
    dns.spec.validate()?;
    let dns_name = dns.name_any();
    converge(
        store,
        configmap::desired_configmap(dns, params),
        configmap::configmap_changed,
        Claim::Owned(&dns_name),
    )
    .await
}

pub async fn ensure_service<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<Service> {
    let dns_name = dns.name_any();
    converge(
        store,
        service::desired_service(dns, params)?,
        service::service_changed,
        Claim::Owned(&dns_name),
    )
    .await
}

pub async fn ensure_network_policy<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<NetworkPolicy> {
    let dns_name = dns.name_any();
    converge(
        store,
        network_policy::desired_network_policy(dns, params)?,
        network_policy::network_policy_changed,
        Claim::Owned(&dns_name),
    )
    .await
}

/// Metrics role, its binding and the service monitor. A cluster without the
/// monitoring CRD answers 404 for the service monitor, which is skipped.
pub async fn ensure_monitoring<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult {
    let dns_name = dns.name_any();
    converge(
        store,
        rbac::desired_metrics_role(dns, params)?,
        rbac::metrics_role_changed,
        Claim::Owned(&dns_name),
    )
    .await?;
    converge(
        store,
        rbac::desired_metrics_role_binding(dns, params)?,
        rbac::metrics_role_binding_changed,
        Claim::Owned(&dns_name),
    )
    .await?;

    let monitor = service_monitor::desired_service_monitor(dns, params)?;
    match converge(
        store,
        monitor,
        service_monitor::service_monitor_changed,
        Claim::Owned(&dns_name),
    )
    .await
    {
        Err(err) if err.is_not_found() => {
            warn!(dns = %dns_name, error = %err, "service monitor API unavailable, skipping");
            Ok(())
        }
        other => other.map(|_| ()),
    }
}

/// Deletes the resolver daemonset if this DNS owns it; its pods follow.
pub async fn delete_daemonset<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns_name: &str,
) -> FleetOperatorResult<bool> {
    let key = ObjectKey::namespaced(&params.operand_namespace, names::daemonset_name(dns_name));
    match store.get::<DaemonSet>(&key).await? {
        Some(ds) if ownership::is_owned_by(&ds, dns_name) => {
            let deleted = store.delete::<DaemonSet>(&key).await?;
            if deleted {
                info!(key = %key, "deleted DNS daemonset");
            }
            Ok(deleted)
        }
        Some(_) => {
            warn!(key = %key, "daemonset is not owned by this DNS, leaving it");
            Ok(false)
        }
        None => Ok(false),
    }
}
