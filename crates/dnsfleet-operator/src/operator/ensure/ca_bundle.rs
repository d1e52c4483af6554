use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::{info, warn};

use super::{converge, Claim};
use crate::error::FleetOperatorResult;
use crate::k8s::{ca_bundle, names, ownership};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;
use crate::store::{ObjectKey, ObjectStore};

/// Copies every referenced CA bundle from the config namespace into the operand
/// namespace. A missing source is skipped and any copy of it we own is
/// withdrawn. Returns the names of the copies now in place.
pub async fn sync_ca_bundles<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<BTreeSet<String>> {
    let dns_name = dns.name_any();
    let mut copies = BTreeSet::new();
    for source_name in ca_bundle::referenced_sources(dns) {
        let key = ObjectKey::namespaced(&params.config_namespace, &source_name);
        let Some(source) = store.get::<ConfigMap>(&key).await? else {
            warn!(source = %key, "CA bundle source does not exist, skipping");
            withdraw_copy(store, params, &source_name, &dns_name).await?;
            continue;
        };
        let copy = converge(
            store,
            ca_bundle::desired_ca_copy(dns, &source, params),
            ca_bundle::ca_copy_changed,
            Claim::Owned(&dns_name),
        )
        .await?;
        copies.insert(copy.name_any());
    }
    Ok(copies)
}

async fn withdraw_copy<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    source_name: &str,
    dns_name: &str,
) -> FleetOperatorResult {
    let key = ObjectKey::namespaced(
        &params.operand_namespace,
        names::ca_bundle_copy_name(source_name),
    );
    match store.get::<ConfigMap>(&key).await? {
        Some(copy) if ownership::is_owned_by(&copy, dns_name) => {
            if store.delete::<ConfigMap>(&key).await? {
                info!(copy = %key, "deleted CA bundle copy of a removed source");
            }
        }
        _ => {}
    }
    Ok(())
}

/// Deletes labeled copies whose source the spec no longer refers to.
pub async fn prune_ca_copies<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns: &ClusterDns,
) -> FleetOperatorResult<usize> {
    let wanted = ca_bundle::wanted_copies(dns);
    let stale: Vec<ConfigMap> = store
        .list::<ConfigMap>(
            Some(&params.operand_namespace),
            &ca_bundle::copy_selector(&dns.name_any()),
        )
        .await?
        .into_iter()
        .filter(|copy| !wanted.contains(&copy.name_any()))
        .collect();
    delete_all(store, stale).await
}

/// Deletes every copy labeled for `dns_name`.
pub async fn delete_ca_copies<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    dns_name: &str,
) -> FleetOperatorResult<usize> {
    let copies = store
        .list::<ConfigMap>(
            Some(&params.operand_namespace),
            &ca_bundle::copy_selector(dns_name),
        )
        .await?;
    delete_all(store, copies).await
}

async fn delete_all<S: ObjectStore>(store: &S, copies: Vec<ConfigMap>) -> FleetOperatorResult<usize> {
    let mut deleted = 0;
    for copy in copies {
        let key = ObjectKey::of(&copy);
        if store.delete::<ConfigMap>(&key).await? {
            info!(copy = %key, "deleted CA bundle copy");
            deleted += 1;
        }
    }
    Ok(deleted)
}
