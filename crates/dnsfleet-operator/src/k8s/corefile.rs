//! Rendering of the resolver's Corefile from the cluster DNS spec.

use std::net::IpAddr;

use super::names;
use crate::operator::crd::{
    ClusterDns, DnsLogLevel, ForwardPolicy, ProtocolStrategy, Transport, TransportConfig,
    Upstream, UpstreamType,
};
use crate::params::RuntimeParams;

const PORT: u16 = 5353;
const RESOLV_CONF: &str = "/etc/resolv.conf";
const DEFAULT_POSITIVE_TTL: u32 = 900;
const DEFAULT_NEGATIVE_TTL: u32 = 30;
const CACHE_DENIAL_CAPACITY: u32 = 9984;

/// Line-oriented writer keeping track of block depth.
#[derive(Default)]
struct Block {
    out: String,
    depth: usize,
}

impl Block {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }
}

fn policy_name(policy: ForwardPolicy) -> &'static str {
    match policy {
        ForwardPolicy::Random => "random",
        ForwardPolicy::RoundRobin => "round_robin",
        ForwardPolicy::Sequential => "sequential",
    }
}

fn log_class(level: DnsLogLevel) -> &'static str {
    match level {
        DnsLogLevel::Normal => "error",
        DnsLogLevel::Debug => "denial error",
        DnsLogLevel::Trace => "all",
    }
}

fn is_tls(transport: Option<&TransportConfig>) -> bool {
    transport.map_or(false, |t| t.transport == Transport::Tls)
}

fn with_scheme(upstream: &str, tls: bool) -> String {
    if tls {
        format!("tls://{}", upstream)
    } else {
        upstream.to_string()
    }
}

/// `address:port`, bracketing IPv6 addresses.
fn network_upstream(upstream: &Upstream) -> Option<String> {
    let address = upstream.address.as_deref().filter(|a| !a.is_empty())?;
    let port = upstream.port.unwrap_or(53);
    Some(match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", address, port),
        _ => format!("{}:{}", address, port),
    })
}

fn forward_options(
    out: &mut Block,
    policy: ForwardPolicy,
    protocol: ProtocolStrategy,
    transport: Option<&TransportConfig>,
) {
    out.line(format!("policy {}", policy_name(policy)));
    if protocol == ProtocolStrategy::Tcp {
        out.line("force_tcp");
    }
    if let Some(tls) = transport.and_then(TransportConfig::tls) {
        out.line(format!("tls_servername {}", tls.server_name));
        match &tls.ca_bundle {
            Some(bundle) => {
                let copy = names::ca_bundle_copy_name(&bundle.name);
                out.line(format!("tls {}", names::ca_file_path(&copy)));
            }
            None => out.line("tls"),
        }
    }
}

fn common_plugins(out: &mut Block, dns: &ClusterDns) {
    out.line("errors");
    out.open("log .");
    out.line(format!("class {}", log_class(dns.spec.log_level)));
    out.close();
    out.line("bufsize 1232");
}

fn cache(out: &mut Block, dns: &ClusterDns) {
    let positive = dns
        .spec
        .cache
        .positive_ttl_seconds
        .unwrap_or(DEFAULT_POSITIVE_TTL);
    let negative = dns
        .spec
        .cache
        .negative_ttl_seconds
        .unwrap_or(DEFAULT_NEGATIVE_TTL);
    out.open(format!("cache {}", positive));
    out.line(format!("denial {} {}", CACHE_DENIAL_CAPACITY, negative));
    out.close();
}

/// Renders the full Corefile. Server blocks come first so their zones win over
/// the default block.
pub fn corefile(dns: &ClusterDns, params: &RuntimeParams) -> String {
    let mut out = Block::default();

    for server in &dns.spec.servers {
        let plugin = &server.forward_plugin;
        let transport = plugin.transport_config.as_ref();
        let tls = is_tls(transport);

        out.line(format!("# {}", server.name));
        let zones = server
            .zones
            .iter()
            .map(|zone| format!("{}:{}", zone, PORT))
            .collect::<Vec<_>>()
            .join(" ");
        out.open(zones);
        out.line("prometheus 127.0.0.1:9153");
        let upstreams = plugin
            .upstreams
            .iter()
            .map(|u| with_scheme(u, tls))
            .collect::<Vec<_>>()
            .join(" ");
        out.open(format!("forward . {}", upstreams));
        forward_options(&mut out, plugin.policy, plugin.protocol_strategy, transport);
        out.close();
        common_plugins(&mut out, dns);
        cache(&mut out, dns);
        out.close();
    }

    out.open(format!(".:{}", PORT));
    common_plugins(&mut out, dns);
    out.open("health");
    out.line("lameduck 20s");
    out.close();
    out.line("ready");
    out.open(format!(
        "kubernetes {} in-addr.arpa ip6.arpa",
        params.cluster_domain
    ));
    out.line("pods insecure");
    out.line("fallthrough in-addr.arpa ip6.arpa");
    out.close();
    out.line("prometheus 127.0.0.1:9153");

    let resolvers = &dns.spec.upstream_resolvers;
    let transport = resolvers.transport_config.as_ref();
    let tls = is_tls(transport);
    let mut upstreams: Vec<String> = resolvers
        .upstreams
        .iter()
        .filter_map(|upstream| match upstream.kind {
            UpstreamType::SystemResolvConf => Some(RESOLV_CONF.to_string()),
            UpstreamType::Network => network_upstream(upstream).map(|u| with_scheme(&u, tls)),
        })
        .collect();
    upstreams.dedup();
    if upstreams.is_empty() {
        upstreams.push(RESOLV_CONF.to_string());
    }
    out.open(format!("forward . {}", upstreams.join(" ")));
    forward_options(
        &mut out,
        resolvers.policy,
        resolvers.protocol_strategy,
        transport,
    );
    out.close();
    cache(&mut out, dns);
    out.line("reload");
    out.close();

    out.open(format!("hostname.bind:{}", PORT));
    out.line("chaos");
    out.close();

    out.out
}
