//! Operand versions reported on the cluster operator.
//!
//! A version is only reported as current once every workload running the operand
//! has enough ready pods on the new image; until then the previously reported
//! value stands.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;

use super::crd::OperandVersion;
use crate::k8s::names::{
    METRICS_PROXY_CONTAINER, NODE_RESOLVER_CONTAINER, OPERAND_CLI_HELPER, OPERAND_CORE_RESOLVER,
    OPERAND_METRICS_PROXY, OPERAND_OPERATOR, RESOLVER_CONTAINER,
};
use crate::params::RuntimeParams;

/// A daemonset and the pods its selector matches.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub daemonset: DaemonSet,
    pub pods: Vec<Pod>,
}

impl Workload {
    fn desired(&self) -> i32 {
        self.daemonset
            .status
            .as_ref()
            .map_or(0, |status| status.desired_number_scheduled)
    }

    fn min_ready(&self) -> Duration {
        let seconds = self
            .daemonset
            .spec
            .as_ref()
            .and_then(|spec| spec.min_ready_seconds)
            .unwrap_or(0);
        Duration::seconds(i64::from(seconds.max(0)))
    }

    /// Pods ready for at least `minReadySeconds` whose `container` runs `image`.
    pub fn ready_on_image(&self, container: &str, image: &str, now: DateTime<Utc>) -> i32 {
        let min_ready = self.min_ready();
        let count = self
            .pods
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .filter(|pod| runs_image(pod, container, image))
            .filter(|pod| ready_since(pod).map_or(false, |since| since + min_ready <= now))
            .count();
        i32::try_from(count).unwrap_or(i32::MAX)
    }

    fn rolled_out(&self, container: &str, image: &str, now: DateTime<Utc>) -> bool {
        self.ready_on_image(container, image, now) >= self.desired()
    }
}

fn runs_image(pod: &Pod, container: &str, image: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.iter().find(|c| c.name == container))
        .and_then(|c| c.image.as_deref())
        == Some(image)
}

fn ready_since(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Ready" && c.status == "True")
        .map(|c| c.last_transition_time.as_ref().map_or(DateTime::<Utc>::MIN_UTC, |t| t.0))
}

/// The workloads the version tracker looks at.
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub primary: Option<Workload>,
    /// The standalone node resolver of older releases, while it still exists.
    pub legacy_node_resolver: Option<Workload>,
}

struct Operand<'a> {
    name: &'static str,
    container: &'static str,
    image: &'a str,
    workloads: Vec<&'a Workload>,
}

fn operands<'a>(params: &'a RuntimeParams, observed: &'a Observed) -> Vec<Operand<'a>> {
    let primary: Vec<&Workload> = observed.primary.iter().collect();
    let node_resolvers: Vec<&Workload> = observed
        .primary
        .iter()
        .chain(observed.legacy_node_resolver.iter())
        .collect();
    vec![
        Operand {
            name: OPERAND_CORE_RESOLVER,
            container: RESOLVER_CONTAINER,
            image: &params.images.core_resolver,
            workloads: primary.clone(),
        },
        Operand {
            name: OPERAND_CLI_HELPER,
            container: NODE_RESOLVER_CONTAINER,
            image: &params.images.cli_helper,
            workloads: node_resolvers,
        },
        Operand {
            name: OPERAND_METRICS_PROXY,
            container: METRICS_PROXY_CONTAINER,
            image: &params.images.metrics_proxy,
            workloads: primary,
        },
    ]
}

/// Versions the operator is rolling out: its release and the operand images.
pub fn target_versions(params: &RuntimeParams) -> Vec<OperandVersion> {
    vec![
        version(OPERAND_OPERATOR, &params.release_version),
        version(OPERAND_CORE_RESOLVER, &params.images.core_resolver),
        version(OPERAND_CLI_HELPER, &params.images.cli_helper),
        version(OPERAND_METRICS_PROXY, &params.images.metrics_proxy),
    ]
}

fn version(name: &str, version: &str) -> OperandVersion {
    OperandVersion {
        name: name.to_string(),
        version: version.to_string(),
    }
}

pub fn lookup<'a>(versions: &'a [OperandVersion], name: &str) -> Option<&'a str> {
    versions
        .iter()
        .find(|v| v.name == name)
        .map(|v| v.version.as_str())
}

/// Versions to report now. Operands without a completed rollout and without a
/// previously reported version are left out.
pub fn current_versions(
    previous: &[OperandVersion],
    params: &RuntimeParams,
    observed: &Observed,
    now: DateTime<Utc>,
) -> Vec<OperandVersion> {
    let mut current = Vec::new();
    let mut all_advanced = true;
    for operand in operands(params, observed) {
        let advanced = !operand.workloads.is_empty()
            && operand
                .workloads
                .iter()
                .all(|w| w.rolled_out(operand.container, operand.image, now));
        let reported = if advanced {
            Some(operand.image)
        } else {
            lookup(previous, operand.name)
        };
        all_advanced &= advanced;
        if let Some(reported) = reported {
            current.push(version(operand.name, reported));
        }
    }

    let operator = if all_advanced {
        Some(params.release_version.as_str())
    } else {
        lookup(previous, OPERAND_OPERATOR)
    };
    if let Some(operator) = operator {
        current.insert(0, version(OPERAND_OPERATOR, operator));
    }
    current
}

/// Operands whose reported version differs from the target, as `(name, target)`.
pub fn pending_upgrades(current: &[OperandVersion], targets: &[OperandVersion]) -> Vec<(String, String)> {
    targets
        .iter()
        .filter(|target| lookup(current, &target.name) != Some(target.version.as_str()))
        .map(|target| (target.name.clone(), target.version.clone()))
        .collect()
}
