use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{FleetOperatorError, FleetOperatorResult};

/// The cluster DNS configuration. A single instance named `default` drives the
/// whole operand fleet.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[kube(
    group = "operator.dnsfleet.io",
    version = "v1",
    kind = "ClusterDns",
    plural = "clusterdnses",
    status = "ClusterDnsStatus",
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"ClusterIP", "type":"string", "jsonPath":".status.clusterIP"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDnsSpec {
    /// Zone-scoped forwarding rules, evaluated before the default server block.
    #[serde(default)]
    pub servers: Vec<Server>,

    /// Where queries that match no server go.
    #[serde(default)]
    pub upstream_resolvers: UpstreamResolvers,

    #[serde(default)]
    pub node_placement: NodePlacement,

    /// Query logging verbosity of the resolver.
    #[serde(default)]
    pub log_level: DnsLogLevel,

    /// Logging verbosity of the operator itself.
    #[serde(default)]
    pub operator_log_level: DnsLogLevel,

    #[serde(default)]
    pub cache: DnsCache,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub name: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub forward_plugin: ForwardPlugin,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPlugin {
    /// `address` or `address:port`; IPv6 addresses with a port use brackets.
    #[serde(default)]
    pub upstreams: Vec<String>,
    #[serde(default)]
    pub policy: ForwardPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_config: Option<TransportConfig>,
    #[serde(default)]
    pub protocol_strategy: ProtocolStrategy,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl TransportConfig {
    /// The TLS settings, when the transport is TLS.
    pub fn tls(&self) -> Option<&TlsConfig> {
        match self.transport {
            Transport::Tls => self.tls.as_ref(),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub server_name: String,
    /// Config map in the config namespace holding a `ca-bundle.crt` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<ConfigMapNameReference>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
pub struct ConfigMapNameReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum ForwardPolicy {
    #[default]
    Random,
    RoundRobin,
    Sequential,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum ProtocolStrategy {
    #[default]
    #[serde(rename = "")]
    Default,
    #[serde(rename = "TCP")]
    Tcp,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum Transport {
    #[default]
    #[serde(rename = "")]
    Default,
    Cleartext,
    #[serde(rename = "TLS")]
    Tls,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResolvers {
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default = "default_upstream_policy")]
    pub policy: ForwardPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_config: Option<TransportConfig>,
    #[serde(default)]
    pub protocol_strategy: ProtocolStrategy,
}

impl Default for UpstreamResolvers {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            policy: default_upstream_policy(),
            transport_config: None,
            protocol_strategy: ProtocolStrategy::Default,
        }
    }
}

fn default_upstream_policy() -> ForwardPolicy {
    ForwardPolicy::Sequential
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    #[serde(rename = "type", default)]
    pub kind: UpstreamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum UpstreamType {
    #[default]
    SystemResolvConf,
    Network,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(skip)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum DnsLogLevel {
    #[default]
    Normal,
    Debug,
    Trace,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DnsCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_ttl_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_ttl_seconds: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDnsStatus {
    /// Address of the DNS service; pods are configured with it as their resolver.
    #[serde(rename = "clusterIP", default)]
    pub cluster_ip: String,
    #[serde(default)]
    pub cluster_domain: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: impl Into<ConditionStatus>,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.into(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}

impl ClusterDns {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }
}

impl ClusterDnsSpec {
    /// Rejects configurations the resolver would refuse to load.
    pub fn validate(&self) -> FleetOperatorResult {
        let mut names = BTreeSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(invalid("server name must not be empty"));
            }
            if !names.insert(server.name.as_str()) {
                return Err(invalid(format!("duplicate server name {}", server.name)));
            }
            if server.zones.is_empty() {
                return Err(invalid(format!("server {} has no zones", server.name)));
            }
            if let Some(zone) = server.zones.iter().find(|z| z.is_empty() || z.as_str() == ".") {
                return Err(invalid(format!(
                    "server {} uses reserved zone {:?}",
                    server.name, zone
                )));
            }
            if server.forward_plugin.upstreams.is_empty() {
                return Err(invalid(format!("server {} has no upstreams", server.name)));
            }
            validate_transport(&server.name, server.forward_plugin.transport_config.as_ref())?;
        }

        let resolvers = &self.upstream_resolvers;
        validate_transport(
            "upstreamResolvers",
            resolvers.transport_config.as_ref(),
        )?;
        for upstream in &resolvers.upstreams {
            match upstream.kind {
                UpstreamType::Network if upstream.address.as_deref().unwrap_or("").is_empty() => {
                    return Err(invalid("network upstream requires an address"));
                }
                UpstreamType::SystemResolvConf
                    if resolvers
                        .transport_config
                        .as_ref()
                        .and_then(TransportConfig::tls)
                        .is_some() =>
                {
                    return Err(invalid(
                        "SystemResolvConf upstreams cannot be used with TLS transport",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn validate_transport(owner: &str, transport: Option<&TransportConfig>) -> FleetOperatorResult {
    let Some(transport) = transport else {
        return Ok(());
    };
    if transport.transport == Transport::Tls {
        match &transport.tls {
            Some(tls) if !tls.server_name.is_empty() => {}
            _ => {
                return Err(invalid(format!(
                    "{} uses TLS transport without a server name",
                    owner
                )))
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> FleetOperatorError {
    FleetOperatorError::InvalidConfig(message.into())
}

/// Cluster-wide status report of the operator, consumed by upgrade tooling.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[kube(
    group = "config.dnsfleet.io",
    version = "v1",
    kind = "ClusterOperator",
    plural = "clusteroperators",
    status = "ClusterOperatorStatus",
    derive = "PartialEq",
    derive = "Default"
)]
pub struct ClusterOperatorSpec {}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub related_objects: Vec<ObjectReference>,
    #[serde(default)]
    pub versions: Vec<OperandVersion>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
pub struct ObjectReference {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
pub struct OperandVersion {
    pub name: String,
    pub version: String,
}
