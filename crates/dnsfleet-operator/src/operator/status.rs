//! Conditions of the cluster DNS derived from its service and daemonset.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info};

use super::conditions::{self, AVAILABLE, DEGRADED, PROGRESSING};
use super::crd::{ClusterDns, ClusterDnsStatus, Condition};
use crate::error::FleetOperatorResult;
use crate::store::ObjectStore;

/// Share of scheduled pods allowed to be unavailable before the DNS counts as
/// degraded.
const MAX_UNAVAILABLE_PERCENT: i64 = 10;

/// Readiness signals of the primary workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadCounts {
    pub available: i32,
    pub desired: i32,
}

impl WorkloadCounts {
    pub fn of(ds: Option<&DaemonSet>) -> Self {
        let status = ds.and_then(|ds| ds.status.as_ref());
        Self {
            available: status.and_then(|s| s.number_available).unwrap_or(0),
            desired: status.map_or(0, |s| s.desired_number_scheduled),
        }
    }

    fn unavailable(&self) -> i64 {
        (i64::from(self.desired) - i64::from(self.available)).max(0)
    }

    fn unavailable_budget(&self) -> i64 {
        let desired = i64::from(self.desired.max(0));
        (desired * MAX_UNAVAILABLE_PERCENT + 99) / 100
    }
}

pub fn cluster_ip(service: Option<&Service>) -> Option<String> {
    service
        .and_then(|svc| svc.spec.as_ref())
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
}

fn degraded(has_address: bool, counts: WorkloadCounts) -> Condition {
    match (has_address, counts.available) {
        (false, 0) => Condition::new(
            DEGRADED,
            true,
            "NoAddressAndWorkload",
            "No IP address is assigned to the DNS service and no DNS pods are available.",
        ),
        (false, _) => Condition::new(
            DEGRADED,
            true,
            "NoAddress",
            "No IP address is assigned to the DNS service.",
        ),
        (true, 0) => Condition::new(
            DEGRADED,
            true,
            "WorkloadUnavailable",
            "No DNS pods are available.",
        ),
        _ if counts.unavailable() > counts.unavailable_budget() => Condition::new(
            DEGRADED,
            true,
            "WorkloadDegraded",
            format!(
                "Too many DNS pods are unavailable ({} > {} max unavailable).",
                counts.unavailable(),
                counts.unavailable_budget()
            ),
        ),
        _ => Condition::new(DEGRADED, false, "AsExpected", "Enough DNS pods are available."),
    }
}

fn progressing(has_address: bool, counts: WorkloadCounts) -> Condition {
    let mut messages = Vec::new();
    if !has_address {
        messages.push("No IP address is assigned to the DNS service.".to_string());
    }
    if counts.available != counts.desired {
        messages.push(format!(
            "Have {} available DNS pods, want {}.",
            counts.available, counts.desired
        ));
    }
    if messages.is_empty() {
        Condition::new(
            PROGRESSING,
            false,
            "AsExpected",
            "All DNS pods are available, and the DNS service has a cluster IP address.",
        )
    } else {
        Condition::new(PROGRESSING, true, "Reconciling", messages.join(" "))
    }
}

fn available(has_address: bool, counts: WorkloadCounts) -> Condition {
    let workload = counts.available > 0;
    match (has_address, workload) {
        (true, true) => Condition::new(
            AVAILABLE,
            true,
            "AsExpected",
            "The DNS daemonset has available pods, and the DNS service has a cluster IP address.",
        ),
        (false, false) => Condition::new(
            AVAILABLE,
            false,
            "NoAddressAndWorkload",
            "The DNS service has no cluster IP address and the DNS daemonset has no available pods.",
        ),
        (false, true) => Condition::new(
            AVAILABLE,
            false,
            "NoAddress",
            "The DNS service has no cluster IP address.",
        ),
        (true, false) => Condition::new(
            AVAILABLE,
            false,
            "WorkloadUnavailable",
            "The DNS daemonset has no available pods.",
        ),
    }
}

/// Degraded, Progressing and Available, without transition times.
pub fn compute_conditions(has_address: bool, counts: WorkloadCounts) -> Vec<Condition> {
    vec![
        degraded(has_address, counts),
        progressing(has_address, counts),
        available(has_address, counts),
    ]
}

/// Result of computing the new status; `degraded_held` is set when a flip to
/// Degraded was postponed and the object should be looked at again later.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStatus {
    pub status: ClusterDnsStatus,
    pub degraded_held: bool,
}

pub fn compute_status(
    dns: &ClusterDns,
    service: Option<&Service>,
    ds: Option<&DaemonSet>,
    cluster_domain: &str,
    now: DateTime<Utc>,
    toleration: Duration,
) -> ComputedStatus {
    let address = cluster_ip(service);
    let counts = WorkloadCounts::of(ds);

    let mut computed = compute_conditions(address.is_some(), counts);
    let mut degraded_held = false;
    if let Some(slot) = computed.iter_mut().find(|c| c.type_ == DEGRADED) {
        let (condition, held) =
            conditions::tolerate_degraded(slot.clone(), dns.condition(DEGRADED), now, toleration);
        *slot = condition;
        degraded_held = held;
    }

    ComputedStatus {
        status: ClusterDnsStatus {
            cluster_ip: address.unwrap_or_default(),
            cluster_domain: cluster_domain.to_string(),
            conditions: conditions::merge_conditions(dns.conditions(), computed, now),
        },
        degraded_held,
    }
}

fn status_changed(current: Option<&ClusterDnsStatus>, desired: &ClusterDnsStatus) -> bool {
    let empty = ClusterDnsStatus::default();
    let current = current.unwrap_or(&empty);
    current.cluster_ip != desired.cluster_ip
        || current.cluster_domain != desired.cluster_domain
        || !conditions::conditions_equal(&current.conditions, &desired.conditions)
}

/// Writes the computed status when it differs from the stored one.
pub async fn sync_dns_status<S: ObjectStore>(
    store: &S,
    dns: &ClusterDns,
    computed: &ComputedStatus,
) -> FleetOperatorResult<bool> {
    if !status_changed(dns.status.as_ref(), &computed.status) {
        debug!(dns = %dns.name_any(), "status unchanged");
        return Ok(false);
    }
    let mut updated = dns.clone();
    updated.status = Some(computed.status.clone());
    store.update_status(&updated).await?;
    info!(
        dns = %dns.name_any(),
        cluster_ip = %computed.status.cluster_ip,
        "updated DNS status"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::dns;
    use chrono::TimeZone;
    use k8s_openapi::api::apps::v1::DaemonSetStatus;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn counts(available: i32, desired: i32) -> WorkloadCounts {
        WorkloadCounts { available, desired }
    }

    fn flags(has_address: bool, available: i32, desired: i32) -> (bool, bool, bool) {
        let computed = compute_conditions(has_address, counts(available, desired));
        let is_true = |type_: &str| conditions::find(&computed, type_).unwrap().is_true();
        (is_true(DEGRADED), is_true(PROGRESSING), is_true(AVAILABLE))
    }

    #[test]
    fn test_status_table() {
        assert_eq!(flags(false, 0, 0), (true, true, false));
        assert_eq!(flags(true, 0, 0), (true, false, false));
        assert_eq!(flags(true, 1, 2), (false, true, true));
        assert_eq!(flags(true, 2, 2), (false, false, true));
    }

    #[test]
    fn test_reasons() {
        let computed = compute_conditions(false, counts(3, 3));
        assert_eq!(conditions::find(&computed, DEGRADED).unwrap().reason, "NoAddress");
        assert_eq!(conditions::find(&computed, AVAILABLE).unwrap().reason, "NoAddress");

        let computed = compute_conditions(true, counts(0, 3));
        assert_eq!(
            conditions::find(&computed, AVAILABLE).unwrap().reason,
            "WorkloadUnavailable"
        );

        let computed = compute_conditions(true, counts(7, 10));
        let degraded = conditions::find(&computed, DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert_eq!(degraded.reason, "WorkloadDegraded");

        let computed = compute_conditions(true, counts(9, 10));
        assert!(conditions::find(&computed, DEGRADED).unwrap().is_false());
        let progressing = conditions::find(&computed, PROGRESSING).unwrap();
        assert!(progressing.message.contains("Have 9 available DNS pods, want 10."));
    }

    fn service(ip: &str) -> Service {
        Service {
            spec: Some(ServiceSpec {
                cluster_ip: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn daemonset(available: i32, desired: i32) -> DaemonSet {
        DaemonSet {
            status: Some(DaemonSetStatus {
                number_available: Some(available),
                desired_number_scheduled: desired,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_cluster_ip_ignores_headless() {
        assert_eq!(cluster_ip(Some(&service("None"))), None);
        assert_eq!(cluster_ip(Some(&service(""))), None);
        assert_eq!(cluster_ip(None), None);
        assert_eq!(
            cluster_ip(Some(&service("172.30.0.10"))).as_deref(),
            Some("172.30.0.10")
        );
    }

    #[test]
    fn test_compute_status_holds_recent_recovery() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let toleration = Duration::seconds(40);
        let mut dns = dns();

        let healthy = compute_status(
            &dns,
            Some(&service("172.30.0.10")),
            Some(&daemonset(2, 2)),
            "cluster.local",
            now,
            toleration,
        );
        assert!(!healthy.degraded_held);
        assert_eq!(healthy.status.cluster_ip, "172.30.0.10");
        assert_eq!(healthy.status.cluster_domain, "cluster.local");
        dns.status = Some(healthy.status);

        let flapping = compute_status(
            &dns,
            Some(&service("172.30.0.10")),
            Some(&daemonset(0, 2)),
            "cluster.local",
            now + Duration::seconds(5),
            toleration,
        );
        assert!(flapping.degraded_held);
        assert!(conditions::find(&flapping.status.conditions, DEGRADED)
            .unwrap()
            .is_false());
        assert!(conditions::find(&flapping.status.conditions, AVAILABLE)
            .unwrap()
            .is_false());

        let later = compute_status(
            &dns,
            Some(&service("172.30.0.10")),
            Some(&daemonset(0, 2)),
            "cluster.local",
            now + Duration::seconds(60),
            toleration,
        );
        assert!(!later.degraded_held);
        assert!(conditions::find(&later.status.conditions, DEGRADED)
            .unwrap()
            .is_true());
    }

    #[test]
    fn test_status_changed_ignores_condition_order() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let computed = compute_status(&dns(), None, None, "cluster.local", now, Duration::zero());
        assert!(status_changed(None, &computed.status));

        let mut reordered = computed.status.clone();
        reordered.conditions.reverse();
        assert!(!status_changed(Some(&reordered), &computed.status));
    }

    #[tokio::test]
    async fn test_duplicate_stored_condition_is_rewritten() {
        let store = crate::store::MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let computed = compute_status(&dns(), None, None, "cluster.local", now, Duration::zero());

        // Same length as the computed set, but Available twice and no Degraded.
        let mut stored = dns();
        let mut conditions = computed.status.conditions.clone();
        let available = conditions::find(&conditions, AVAILABLE).unwrap().clone();
        conditions.retain(|c| c.type_ != DEGRADED);
        conditions.push(available);
        stored.status = Some(ClusterDnsStatus {
            conditions,
            ..computed.status.clone()
        });
        let stored = store.seed(&stored).unwrap();

        assert!(sync_dns_status(&store, &stored, &computed).await.unwrap());
        let written: ClusterDns = store
            .object(&crate::store::ObjectKey::cluster("default"))
            .unwrap();
        let written = written.status.unwrap().conditions;
        assert_eq!(written.len(), 3);
        assert!(conditions::find(&written, DEGRADED).unwrap().is_true());
    }
}
