use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, KeyToPath, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use super::{ca_bundle, compare, manifests, names, ownership, service::pod_selector};
use crate::error::{FleetOperatorError, FleetOperatorResult};
use crate::operator::crd::ClusterDns;
use crate::params::RuntimeParams;

const TEMPLATE: &str = "daemonset.yaml";

/// Service names the node resolver publishes into each node's hosts file.
const NODE_RESOLVER_SERVICES: &str = "image-registry.dnsfleet-image-registry.svc";

fn container<'a>(pod: &'a mut PodSpec, name: &str) -> FleetOperatorResult<&'a mut Container> {
    pod.containers
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| FleetOperatorError::template(TEMPLATE, format!("no {} container", name)))
}

fn volume<'a>(pod: &'a mut PodSpec, name: &str) -> FleetOperatorResult<&'a mut Volume> {
    pod.volumes
        .get_or_insert_with(Vec::new)
        .iter_mut()
        .find(|v| v.name == name)
        .ok_or_else(|| FleetOperatorError::template(TEMPLATE, format!("no {} volume", name)))
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// The resolver daemonset: resolver, node resolver helper and metrics proxy.
pub fn desired_daemonset(dns: &ClusterDns, params: &RuntimeParams) -> FleetOperatorResult<DaemonSet> {
    let dns_name = dns.name_any();
    let mut ds = manifests::daemonset()?;
    ds.metadata.name = Some(names::daemonset_name(&dns_name));
    ds.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut ds, dns);

    let spec = ds
        .spec
        .as_mut()
        .ok_or_else(|| FleetOperatorError::template(TEMPLATE, "missing spec"))?;
    spec.selector = LabelSelector {
        match_labels: Some(pod_selector(&dns_name)),
        ..Default::default()
    };
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(pod_selector(&dns_name));

    let pod = spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| FleetOperatorError::template(TEMPLATE, "missing pod spec"))?;

    container(pod, names::RESOLVER_CONTAINER)?.image = Some(params.images.core_resolver.clone());
    container(pod, names::METRICS_PROXY_CONTAINER)?.image =
        Some(params.images.metrics_proxy.clone());
    let node_resolver = container(pod, names::NODE_RESOLVER_CONTAINER)?;
    node_resolver.image = Some(params.images.cli_helper.clone());
    node_resolver.env = Some(vec![
        env("SERVICES", NODE_RESOLVER_SERVICES),
        env("NAMESERVER", &params.cluster_ip),
        env("CLUSTER_DOMAIN", &params.cluster_domain),
    ]);

    volume(pod, names::CONFIG_VOLUME)?
        .config_map
        .get_or_insert_with(Default::default)
        .name = names::configmap_name(&dns_name);
    volume(pod, names::METRICS_TLS_VOLUME)?
        .secret
        .get_or_insert_with(Default::default)
        .secret_name = Some(names::metrics_secret_name(&dns_name));

    // Copies may not exist yet; optional volumes keep pods starting meanwhile.
    for copy in ca_bundle::wanted_copies(dns) {
        pod.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: copy.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: copy.clone(),
                items: Some(vec![KeyToPath {
                    key: names::CA_BUNDLE_KEY.to_string(),
                    path: names::CA_BUNDLE_KEY.to_string(),
                    ..Default::default()
                }]),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        container(pod, names::RESOLVER_CONTAINER)?
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: copy.clone(),
                mount_path: names::ca_mount_path(&copy),
                read_only: Some(true),
                ..Default::default()
            });
    }

    let placement = &dns.spec.node_placement;
    if !placement.node_selector.is_empty() {
        pod.node_selector = Some(placement.node_selector.clone());
    }
    if !placement.tolerations.is_empty() {
        pod.tolerations = Some(placement.tolerations.clone());
    }

    Ok(ds)
}

/// Copies the compared container fields from `desired`; true when anything
/// differed.
fn sync_container(current: &mut Container, desired: &Container) -> bool {
    let mut changed = false;
    if current.image != desired.image {
        current.image = desired.image.clone();
        changed = true;
    }
    if !compare::list_eq(&current.command, &desired.command) {
        current.command = desired.command.clone();
        changed = true;
    }
    if !compare::list_eq(&current.args, &desired.args) {
        current.args = desired.args.clone();
        changed = true;
    }
    if !compare::list_eq(&current.env, &desired.env) {
        current.env = desired.env.clone();
        changed = true;
    }
    if !compare::list_eq(&current.volume_mounts, &desired.volume_mounts) {
        current.volume_mounts = desired.volume_mounts.clone();
        changed = true;
    }
    if !compare::probe_eq(&current.readiness_probe, &desired.readiness_probe) {
        current.readiness_probe = desired.readiness_probe.clone();
        changed = true;
    }
    changed
}

fn same_containers(current: &[Container], desired: &[Container]) -> bool {
    current.len() == desired.len() && current.iter().zip(desired).all(|(a, b)| a.name == b.name)
}

/// Compares images, commands, environment, mounts, readiness probes, node
/// selector, tolerations and volumes. Everything else on the live object is
/// left as the server and other actors have it.
pub fn daemonset_changed(current: &DaemonSet, desired: &DaemonSet) -> Option<DaemonSet> {
    let desired_pod = desired.spec.as_ref()?.template.spec.as_ref()?;

    let mut updated = current.clone();
    let pod = updated
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);

    let mut changed = false;
    if same_containers(&pod.containers, &desired_pod.containers) {
        for (current, desired) in pod.containers.iter_mut().zip(&desired_pod.containers) {
            changed |= sync_container(current, desired);
        }
    } else {
        pod.containers = desired_pod.containers.clone();
        changed = true;
    }
    if !compare::map_eq(&pod.node_selector, &desired_pod.node_selector) {
        pod.node_selector = desired_pod.node_selector.clone();
        changed = true;
    }
    if !compare::tolerations_eq(&pod.tolerations, &desired_pod.tolerations) {
        pod.tolerations = desired_pod.tolerations.clone();
        changed = true;
    }
    if !compare::volumes_eq(&pod.volumes, &desired_pod.volumes) {
        pod.volumes = desired_pod.volumes.clone();
        changed = true;
    }

    changed.then_some(updated)
}

/// Image of the named container, if the daemonset runs one.
pub fn container_image<'a>(ds: &'a DaemonSet, name: &str) -> Option<&'a str> {
    ds.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == name)?
        .image
        .as_deref()
}
