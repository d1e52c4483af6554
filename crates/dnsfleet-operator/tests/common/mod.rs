#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dnsfleet_common::settings::{ImageSettings, Settings};
use dnsfleet_operator::clock::FixedClock;
use dnsfleet_operator::operator::crd::{ClusterDns, ClusterDnsSpec};
use dnsfleet_operator::operator::reconcile::Context;
use dnsfleet_operator::params::RuntimeParams;
use dnsfleet_operator::store::MemoryStore;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

pub fn settings(release: &str, core_image: &str) -> Settings {
    Settings {
        release_version: release.to_string(),
        images: ImageSettings {
            core_resolver: core_image.to_string(),
            cli_helper: "registry.example/cli:v1".to_string(),
            metrics_proxy: "registry.example/rbac-proxy:v1".to_string(),
        },
        ..Default::default()
    }
}

pub fn params() -> RuntimeParams {
    RuntimeParams::from_settings(&settings("4.16.0", "registry.example/coredns:v1")).unwrap()
}

pub struct Harness {
    pub ctx: Context<MemoryStore>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new(params: RuntimeParams) -> Self {
        let clock = Arc::new(FixedClock::new(start()));
        let ctx = Context::new(MemoryStore::new(), params, clock.clone());
        Self { ctx, clock }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.ctx.store
    }

    pub fn params(&self) -> &RuntimeParams {
        &self.ctx.params
    }
}

pub fn dns(spec: ClusterDnsSpec) -> ClusterDns {
    ClusterDns::new("default", spec)
}
