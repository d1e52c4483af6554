mod common;

use chrono::Duration;
use common::{dns, settings, start, Harness};
use dnsfleet_operator::k8s::names::{self, OPERAND_CORE_RESOLVER, OPERAND_OPERATOR};
use dnsfleet_operator::k8s::service::pod_selector;
use dnsfleet_operator::operator::cluster_status::sync_cluster_operator;
use dnsfleet_operator::operator::conditions::{AVAILABLE, DEGRADED, PROGRESSING};
use dnsfleet_operator::operator::crd::{
    ClusterDnsSpec, ClusterDnsStatus, ClusterOperator, ClusterOperatorSpec,
    ClusterOperatorStatus, Condition, OperandVersion,
};
use dnsfleet_operator::operator::versions::lookup;
use dnsfleet_operator::params::RuntimeParams;
use dnsfleet_operator::store::{ObjectKey, Verb};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetStatus};
use k8s_openapi::api::core::v1::{Container, Pod, PodCondition, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};

const OLD_RELEASE: &str = "v1";
const NEW_RELEASE: &str = "v2";
const CORE_IMAGE: &str = "dns-v1";

fn upgrade_params() -> RuntimeParams {
    RuntimeParams::from_settings(&settings(NEW_RELEASE, CORE_IMAGE)).unwrap()
}

fn version(name: &str, version: &str) -> OperandVersion {
    OperandVersion {
        name: name.to_string(),
        version: version.to_string(),
    }
}

fn seed_operator(h: &Harness) {
    let params = h.params();
    let mut operator = ClusterOperator::new(names::CLUSTER_OPERATOR_NAME, ClusterOperatorSpec {});
    operator.status = Some(ClusterOperatorStatus {
        versions: vec![
            version(OPERAND_OPERATOR, OLD_RELEASE),
            version(OPERAND_CORE_RESOLVER, CORE_IMAGE),
            version(names::OPERAND_CLI_HELPER, &params.images.cli_helper),
            version(names::OPERAND_METRICS_PROXY, &params.images.metrics_proxy),
        ],
        ..Default::default()
    });
    h.store().seed(&operator).unwrap();
}

fn seed_healthy_dns(h: &Harness) {
    let mut dns = dns(ClusterDnsSpec::default());
    dns.status = Some(ClusterDnsStatus {
        cluster_ip: "172.30.0.10".to_string(),
        cluster_domain: "cluster.local".to_string(),
        conditions: vec![
            Condition::new(AVAILABLE, true, "AsExpected", ""),
            Condition::new(PROGRESSING, false, "AsExpected", ""),
            Condition::new(DEGRADED, false, "AsExpected", ""),
        ],
    });
    h.store().seed(&dns).unwrap();
}

fn seed_daemonset(h: &Harness, desired: i32) {
    let mut ds = DaemonSet {
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(pod_selector("default")),
                ..Default::default()
            },
            min_ready_seconds: Some(0),
            ..Default::default()
        }),
        status: Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            number_available: Some(desired),
            ..Default::default()
        }),
        ..Default::default()
    };
    ds.metadata.name = Some(names::daemonset_name("default"));
    ds.metadata.namespace = Some(h.params().operand_namespace.clone());
    h.store().seed(&ds).unwrap();
}

fn seed_pod(h: &Harness, name: &str, ready: bool) {
    let params = h.params();
    let container = |name: &str, image: &str| Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    };
    let mut pod = Pod {
        spec: Some(PodSpec {
            containers: vec![
                container(names::RESOLVER_CONTAINER, &params.images.core_resolver),
                container(names::NODE_RESOLVER_CONTAINER, &params.images.cli_helper),
                container(names::METRICS_PROXY_CONTAINER, &params.images.metrics_proxy),
            ],
            ..Default::default()
        }),
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                last_transition_time: Some(Time(start() - Duration::seconds(30))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(params.operand_namespace.clone());
    pod.metadata.labels = Some(pod_selector("default"));
    h.store().seed(&pod).unwrap();
}

fn condition<'a>(status: &'a ClusterOperatorStatus, type_: &str) -> &'a Condition {
    status.conditions.iter().find(|c| c.type_ == type_).unwrap()
}

#[tokio::test]
async fn test_rollout_reports_new_version_once_ready() {
    let h = Harness::new(upgrade_params());
    seed_operator(&h);
    seed_healthy_dns(&h);
    seed_daemonset(&h, 2);
    seed_pod(&h, "dns-default-a", true);
    seed_pod(&h, "dns-default-b", false);

    let status = sync_cluster_operator(h.store(), h.params(), h.clock.as_ref())
        .await
        .unwrap();
    assert_eq!(lookup(&status.versions, OPERAND_OPERATOR), Some(OLD_RELEASE));
    assert_eq!(lookup(&status.versions, OPERAND_CORE_RESOLVER), Some(CORE_IMAGE));
    let progressing = condition(&status, PROGRESSING);
    assert!(progressing.is_true());
    assert_eq!(progressing.reason, "Upgrading");
    assert!(progressing.message.contains("Upgrading operator to \"v2\"."));
    assert!(condition(&status, AVAILABLE).is_true());
    assert!(condition(&status, DEGRADED).is_false());

    seed_pod(&h, "dns-default-b", true);
    h.clock.advance(Duration::seconds(5));
    let status = sync_cluster_operator(h.store(), h.params(), h.clock.as_ref())
        .await
        .unwrap();
    assert_eq!(lookup(&status.versions, OPERAND_OPERATOR), Some(NEW_RELEASE));
    assert_eq!(lookup(&status.versions, OPERAND_CORE_RESOLVER), Some(CORE_IMAGE));
    assert!(condition(&status, PROGRESSING).is_false());

    let stored: ClusterOperator = h
        .store()
        .object(&ObjectKey::cluster(names::CLUSTER_OPERATOR_NAME))
        .unwrap();
    assert_eq!(stored.status.unwrap().versions, status.versions);
}

#[tokio::test]
async fn test_missing_dns_is_reported() {
    let h = Harness::new(upgrade_params());

    let status = sync_cluster_operator(h.store(), h.params(), h.clock.as_ref())
        .await
        .unwrap();
    assert_eq!(condition(&status, DEGRADED).reason, "DNSDoesNotExist");
    assert_eq!(condition(&status, AVAILABLE).reason, "DNSDoesNotExist");
    assert!(condition(&status, PROGRESSING)
        .reason
        .starts_with("DNSDoesNotExistAndUpgrading"));
    assert_eq!(status.related_objects.len(), 3);

    let writes = h.store().writes();
    assert_eq!(writes[0].verb, Verb::Create);
    assert_eq!(writes[0].kind, "ClusterOperator");
    assert_eq!(writes[1].verb, Verb::UpdateStatus);
}

#[tokio::test]
async fn test_settled_status_is_not_rewritten() {
    let h = Harness::new(upgrade_params());
    seed_operator(&h);
    seed_healthy_dns(&h);
    seed_daemonset(&h, 1);
    seed_pod(&h, "dns-default-a", true);

    sync_cluster_operator(h.store(), h.params(), h.clock.as_ref())
        .await
        .unwrap();
    h.store().clear_writes();
    h.clock.advance(Duration::minutes(10));
    sync_cluster_operator(h.store(), h.params(), h.clock.as_ref())
        .await
        .unwrap();
    assert!(h.store().writes().is_empty());
}
