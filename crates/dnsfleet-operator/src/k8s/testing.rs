//! Fixtures shared by the generator tests.

use dnsfleet_common::settings::{ImageSettings, Settings};

use crate::operator::crd::{ClusterDns, ClusterDnsSpec};
use crate::params::RuntimeParams;

pub fn params() -> RuntimeParams {
    let settings = Settings {
        release_version: "4.16.0".to_string(),
        images: ImageSettings {
            core_resolver: "registry.example/coredns:v1".to_string(),
            cli_helper: "registry.example/cli:v1".to_string(),
            metrics_proxy: "registry.example/rbac-proxy:v1".to_string(),
        },
        ..Default::default()
    };
    RuntimeParams::from_settings(&settings).unwrap()
}

pub fn dns_with(spec: ClusterDnsSpec) -> ClusterDns {
    let mut dns = ClusterDns::new("default", spec);
    dns.metadata.uid = Some("0b9e6a57-dns".to_string());
    dns
}

pub fn dns() -> ClusterDns {
    dns_with(ClusterDnsSpec::default())
}
