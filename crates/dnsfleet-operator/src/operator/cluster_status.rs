//! Status of the `dns` cluster operator: a summary of the cluster DNS plus the
//! rollout progress of every operand.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::conditions::{self, AVAILABLE, DEGRADED, PROGRESSING, UPGRADEABLE};
use super::crd::{
    ClusterDns, ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, Condition,
    ObjectReference, OperandVersion,
};
use super::versions::{self, Observed, Workload};
use crate::clock::Clock;
use crate::error::FleetOperatorResult;
use crate::k8s::names::{self, CLUSTER_OPERATOR_NAME, DEFAULT_DNS_NAME};
use crate::params::RuntimeParams;
use crate::store::{ObjectKey, ObjectStore};

/// Fetches the cluster operator, creating an empty one if needed.
pub async fn ensure_cluster_operator<S: ObjectStore>(store: &S) -> FleetOperatorResult<ClusterOperator> {
    let key = ObjectKey::cluster(CLUSTER_OPERATOR_NAME);
    if let Some(existing) = store.get::<ClusterOperator>(&key).await? {
        return Ok(existing);
    }
    let created = store
        .create(&ClusterOperator::new(
            CLUSTER_OPERATOR_NAME,
            ClusterOperatorSpec::default(),
        ))
        .await?;
    info!(name = CLUSTER_OPERATOR_NAME, "created cluster operator");
    Ok(created)
}

pub fn related_objects(params: &RuntimeParams) -> Vec<ObjectReference> {
    vec![
        ObjectReference {
            group: String::new(),
            resource: "namespaces".to_string(),
            namespace: String::new(),
            name: params.operator_namespace.clone(),
        },
        ObjectReference {
            group: String::new(),
            resource: "namespaces".to_string(),
            namespace: String::new(),
            name: params.operand_namespace.clone(),
        },
        ObjectReference {
            group: ClusterDns::group(&()).to_string(),
            resource: ClusterDns::plural(&()).to_string(),
            namespace: String::new(),
            name: DEFAULT_DNS_NAME.to_string(),
        },
    ]
}

fn dns_condition_true(dns: &ClusterDns, type_: &str) -> bool {
    dns.condition(type_).map_or(false, Condition::is_true)
}

fn degraded(dns: Option<&ClusterDns>) -> Condition {
    match dns {
        None => Condition::new(
            DEGRADED,
            true,
            "DNSDoesNotExist",
            format!("DNS {:?} does not exist.", DEFAULT_DNS_NAME),
        ),
        Some(dns) if dns_condition_true(dns, DEGRADED) => Condition::new(
            DEGRADED,
            true,
            "DNSDegraded",
            format!("DNS {:?} is degraded.", dns.name_any()),
        ),
        Some(dns) => Condition::new(
            DEGRADED,
            false,
            "DNSNotDegraded",
            format!("DNS {:?} is not degraded.", dns.name_any()),
        ),
    }
}

fn available(dns: Option<&ClusterDns>) -> Condition {
    match dns {
        None => Condition::new(
            AVAILABLE,
            false,
            "DNSDoesNotExist",
            format!("DNS {:?} does not exist.", DEFAULT_DNS_NAME),
        ),
        Some(dns) if dns_condition_true(dns, AVAILABLE) => Condition::new(
            AVAILABLE,
            true,
            "DNSAvailable",
            format!("DNS {:?} is available.", dns.name_any()),
        ),
        Some(dns) => Condition::new(
            AVAILABLE,
            false,
            "DNSUnavailable",
            format!("DNS {:?} is unavailable.", dns.name_any()),
        ),
    }
}

fn progressing(dns: Option<&ClusterDns>, pending: &[(String, String)]) -> Condition {
    let mut reasons = Vec::new();
    let mut messages = Vec::new();
    match dns {
        None => {
            reasons.push("DNSDoesNotExist");
            messages.push(format!("DNS {:?} does not exist.", DEFAULT_DNS_NAME));
        }
        Some(dns) if !dns.condition(PROGRESSING).map_or(false, Condition::is_false) => {
            reasons.push("DNSReportsProgressingIsTrue");
            messages.push(format!("DNS {:?} is progressing.", dns.name_any()));
        }
        Some(_) => {}
    }
    if !pending.is_empty() {
        reasons.push("Upgrading");
        messages.extend(
            pending
                .iter()
                .map(|(name, target)| format!("Upgrading {} to {:?}.", name, target)),
        );
    }

    if reasons.is_empty() {
        Condition::new(
            PROGRESSING,
            false,
            "AsExpected",
            "Desired and current number of DNSes are equal, and versions are in sync.",
        )
    } else {
        Condition::new(PROGRESSING, true, &reasons.join("And"), messages.join("\n"))
    }
}

fn upgradeable() -> Condition {
    Condition::new(UPGRADEABLE, true, "AsExpected", "DNS can be upgraded.")
}

/// Degraded, Progressing, Available and Upgradeable, without transition times.
pub fn compute_operator_conditions(
    dns: Option<&ClusterDns>,
    current: &[OperandVersion],
    targets: &[OperandVersion],
) -> Vec<Condition> {
    let pending = versions::pending_upgrades(current, targets);
    vec![
        degraded(dns),
        progressing(dns, &pending),
        available(dns),
        upgradeable(),
    ]
}

fn status_changed(current: Option<&ClusterOperatorStatus>, desired: &ClusterOperatorStatus) -> bool {
    let empty = ClusterOperatorStatus::default();
    let current = current.unwrap_or(&empty);
    current.versions != desired.versions
        || current.related_objects != desired.related_objects
        || !conditions::conditions_equal(&current.conditions, &desired.conditions)
}

async fn observe_workload<S: ObjectStore>(
    store: &S,
    namespace: &str,
    name: &str,
) -> FleetOperatorResult<Option<Workload>> {
    let key = ObjectKey::namespaced(namespace, name);
    let Some(daemonset) = store.get::<DaemonSet>(&key).await? else {
        return Ok(None);
    };
    let selector: BTreeMap<String, String> = daemonset
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.clone())
        .unwrap_or_default();
    // An empty selector would match every pod in the namespace.
    let pods = if selector.is_empty() {
        Vec::new()
    } else {
        store.list::<Pod>(Some(namespace), &selector).await?
    };
    Ok(Some(Workload { daemonset, pods }))
}

pub async fn observe<S: ObjectStore>(store: &S, params: &RuntimeParams) -> FleetOperatorResult<Observed> {
    let namespace = &params.operand_namespace;
    Ok(Observed {
        primary: observe_workload(store, namespace, &names::daemonset_name(DEFAULT_DNS_NAME)).await?,
        legacy_node_resolver: observe_workload(store, namespace, names::LEGACY_NODE_RESOLVER).await?,
    })
}

/// Recomputes and, when it changed, writes the cluster operator status.
/// Returns the status now stored.
pub async fn sync_cluster_operator<S: ObjectStore>(
    store: &S,
    params: &RuntimeParams,
    clock: &dyn Clock,
) -> FleetOperatorResult<ClusterOperatorStatus> {
    let operator = ensure_cluster_operator(store).await?;
    let dns = store
        .get::<ClusterDns>(&ObjectKey::cluster(DEFAULT_DNS_NAME))
        .await?;
    let observed = observe(store, params).await?;
    let now = clock.now();

    let previous = operator.status.clone().unwrap_or_default();
    let current = versions::current_versions(&previous.versions, params, &observed, now);
    let computed = compute_operator_conditions(
        dns.as_ref(),
        &current,
        &versions::target_versions(params),
    );
    let desired = ClusterOperatorStatus {
        conditions: conditions::merge_conditions(&previous.conditions, computed, now),
        related_objects: related_objects(params),
        versions: current,
    };

    if !status_changed(operator.status.as_ref(), &desired) {
        debug!(name = CLUSTER_OPERATOR_NAME, "cluster operator status unchanged");
        return Ok(previous);
    }
    let mut updated = operator;
    updated.status = Some(desired.clone());
    store.update_status(&updated).await?;
    info!(
        name = CLUSTER_OPERATOR_NAME,
        versions = ?desired.versions,
        "updated cluster operator status"
    );
    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::{dns, params};
    use crate::operator::crd::ClusterDnsStatus;
    use crate::store::MemoryStore;

    fn with_conditions(conditions: Vec<Condition>) -> ClusterDns {
        let mut dns = dns();
        dns.status = Some(ClusterDnsStatus {
            conditions,
            ..Default::default()
        });
        dns
    }

    #[test]
    fn test_missing_dns_reasons() {
        let computed = compute_operator_conditions(None, &[], &[]);
        for type_ in [DEGRADED, PROGRESSING, AVAILABLE] {
            assert_eq!(
                conditions::find(&computed, type_).unwrap().reason,
                "DNSDoesNotExist"
            );
        }
        assert!(conditions::find(&computed, DEGRADED).unwrap().is_true());
        assert!(conditions::find(&computed, UPGRADEABLE).unwrap().is_true());
    }

    #[test]
    fn test_progressing_reasons_are_joined() {
        let dns = with_conditions(vec![Condition::new(PROGRESSING, true, "Reconciling", "")]);
        let targets = vec![OperandVersion {
            name: "operator".to_string(),
            version: "v2".to_string(),
        }];
        let computed = compute_operator_conditions(Some(&dns), &[], &targets);
        let progressing = conditions::find(&computed, PROGRESSING).unwrap();
        assert!(progressing.is_true());
        assert_eq!(progressing.reason, "DNSReportsProgressingIsTrueAndUpgrading");
        assert!(progressing.message.contains("Upgrading operator to \"v2\"."));
    }

    #[test]
    fn test_healthy_dns_settles() {
        let dns = with_conditions(vec![
            Condition::new(AVAILABLE, true, "AsExpected", ""),
            Condition::new(PROGRESSING, false, "AsExpected", ""),
            Condition::new(DEGRADED, false, "AsExpected", ""),
        ]);
        let versions = vec![OperandVersion {
            name: "operator".to_string(),
            version: "v2".to_string(),
        }];
        let computed = compute_operator_conditions(Some(&dns), &versions, &versions);
        assert_eq!(conditions::find(&computed, AVAILABLE).unwrap().reason, "DNSAvailable");
        assert_eq!(conditions::find(&computed, DEGRADED).unwrap().reason, "DNSNotDegraded");
        let progressing = conditions::find(&computed, PROGRESSING).unwrap();
        assert!(progressing.is_false());
        assert!(progressing.message.contains("versions are in sync"));
    }

    #[test]
    fn test_related_objects() {
        let related = related_objects(&params());
        assert_eq!(related.len(), 3);
        assert_eq!(related[2].group, "operator.dnsfleet.io");
        assert_eq!(related[2].resource, "clusterdnses");
        assert_eq!(related[2].name, "default");
    }

    #[tokio::test]
    async fn test_sync_creates_operator_and_settles() {
        let store = MemoryStore::new();
        let params = params();
        let clock = crate::clock::SystemClock;

        let status = sync_cluster_operator(&store, &params, &clock).await.unwrap();
        assert!(conditions::find(&status.conditions, DEGRADED).unwrap().is_true());
        assert!(status.versions.is_empty());

        store.clear_writes();
        sync_cluster_operator(&store, &params, &clock).await.unwrap();
        assert!(store.writes().is_empty());
    }
}
