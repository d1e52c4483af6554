//! Copies of user CA bundles from the config namespace into the operand namespace.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use super::{compare, names, ownership};
use crate::operator::crd::{ClusterDns, TransportConfig};
use crate::params::RuntimeParams;

/// Names of every CA bundle config map the spec refers to.
pub fn referenced_sources(dns: &ClusterDns) -> BTreeSet<String> {
    dns.spec
        .servers
        .iter()
        .filter_map(|server| server.forward_plugin.transport_config.as_ref())
        .chain(dns.spec.upstream_resolvers.transport_config.as_ref())
        .filter_map(TransportConfig::tls)
        .filter_map(|tls| tls.ca_bundle.as_ref())
        .map(|bundle| bundle.name.clone())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Copy names that should exist for the current spec.
pub fn wanted_copies(dns: &ClusterDns) -> BTreeSet<String> {
    referenced_sources(dns)
        .iter()
        .map(|source| names::ca_bundle_copy_name(source))
        .collect()
}

/// Labels selecting the copies owned by `dns_name`.
pub fn copy_selector(dns_name: &str) -> BTreeMap<String, String> {
    let mut labels = ownership::scoping_labels(dns_name);
    labels.insert(names::CA_BUNDLE_COPY_LABEL.to_string(), "true".to_string());
    labels
}

pub fn desired_ca_copy(dns: &ClusterDns, source: &ConfigMap, params: &RuntimeParams) -> ConfigMap {
    let bundle = source
        .data
        .as_ref()
        .and_then(|data| data.get(names::CA_BUNDLE_KEY))
        .cloned()
        .unwrap_or_default();

    let mut copy = ConfigMap {
        data: Some(BTreeMap::from([(names::CA_BUNDLE_KEY.to_string(), bundle)])),
        ..Default::default()
    };
    copy.metadata.name = Some(names::ca_bundle_copy_name(&source.name_any()));
    copy.metadata.namespace = Some(params.operand_namespace.clone());
    ownership::set_owned(&mut copy, dns);
    copy.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(copy_selector(&dns.name_any()));
    copy
}

/// Only the payload is compared and replaced.
pub fn ca_copy_changed(current: &ConfigMap, desired: &ConfigMap) -> Option<ConfigMap> {
    if compare::map_eq(&current.data, &desired.data) {
        return None;
    }
    let mut updated = current.clone();
    updated.data = desired.data.clone();
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::testing::{dns_with, params};
    use crate::operator::crd::{
        ClusterDnsSpec, ConfigMapNameReference, ForwardPlugin, Server, TlsConfig, Transport,
        UpstreamResolvers,
    };

    fn tls(bundle: &str) -> Option<TransportConfig> {
        Some(TransportConfig {
            transport: Transport::Tls,
            tls: Some(TlsConfig {
                server_name: "dns.example.com".to_string(),
                ca_bundle: Some(ConfigMapNameReference {
                    name: bundle.to_string(),
                }),
            }),
        })
    }

    fn server(name: &str, transport: Option<TransportConfig>) -> Server {
        Server {
            name: name.to_string(),
            zones: vec![format!("{}.example.com", name)],
            forward_plugin: ForwardPlugin {
                upstreams: vec!["10.0.0.1".to_string()],
                transport_config: transport,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_referenced_sources() {
        let mut cleartext = tls("ignored");
        if let Some(config) = cleartext.as_mut() {
            config.transport = Transport::Cleartext;
        }
        let dns = dns_with(ClusterDnsSpec {
            servers: vec![
                server("a", tls("corp-ca")),
                server("b", tls("corp-ca")),
                server("c", cleartext),
            ],
            upstream_resolvers: UpstreamResolvers {
                transport_config: tls("upstream-ca"),
                ..Default::default()
            },
            ..Default::default()
        });

        let sources: Vec<_> = referenced_sources(&dns).into_iter().collect();
        assert_eq!(sources, ["corp-ca", "upstream-ca"]);
        assert!(wanted_copies(&dns).contains("ca-corp-ca"));
    }

    #[test]
    fn test_desired_copy_and_diff() {
        let dns = dns_with(ClusterDnsSpec {
            servers: vec![server("a", tls("corp-ca"))],
            ..Default::default()
        });
        let mut source = ConfigMap::default();
        source.metadata.name = Some("corp-ca".to_string());
        source.metadata.namespace = Some("dnsfleet-config".to_string());
        source.data = Some(BTreeMap::from([(
            "ca-bundle.crt".to_string(),
            "-----BEGIN CERTIFICATE-----".to_string(),
        )]));

        let desired = desired_ca_copy(&dns, &source, &params());
        assert_eq!(desired.metadata.name.as_deref(), Some("ca-corp-ca"));
        assert_eq!(desired.metadata.namespace.as_deref(), Some("dnsfleet-dns"));
        assert!(ownership::is_owned_by(&desired, "default"));
        assert_eq!(
            desired.metadata.labels.as_ref().unwrap()[names::CA_BUNDLE_COPY_LABEL],
            "true"
        );

        let mut stale = desired.clone();
        stale.data = Some(BTreeMap::from([(
            "ca-bundle.crt".to_string(),
            "old".to_string(),
        )]));
        let merged = ca_copy_changed(&stale, &desired).unwrap();
        assert!(ca_copy_changed(&merged, &desired).is_none());
    }
}
