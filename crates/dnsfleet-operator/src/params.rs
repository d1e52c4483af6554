use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::Duration;
use dnsfleet_common::settings::{ImageSettings, Settings};
use ipnetwork::IpNetwork;

use crate::error::{FleetOperatorError, FleetOperatorResult};

/// Offset of the DNS service address inside the service network.
const CLUSTER_IP_OFFSET: u32 = 10;

/// Everything the generators need from the process environment, resolved once at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParams {
    pub release_version: String,
    pub images: ImageSettings,
    pub operator_namespace: String,
    pub operand_namespace: String,
    pub config_namespace: String,
    pub cluster_ip: String,
    pub cluster_domain: String,
    pub degraded_toleration: Duration,
}

impl RuntimeParams {
    pub fn from_settings(settings: &Settings) -> FleetOperatorResult<Self> {
        settings.validate()?;

        let network: IpNetwork = settings.service_cidr.parse().map_err(|err| {
            FleetOperatorError::InvalidConfig(format!(
                "service CIDR {}: {}",
                settings.service_cidr, err
            ))
        })?;
        let cluster_ip = nth_address(network, CLUSTER_IP_OFFSET).ok_or_else(|| {
            FleetOperatorError::InvalidConfig(format!(
                "service CIDR {} is too small for a DNS address",
                settings.service_cidr
            ))
        })?;

        let toleration_secs = i64::try_from(settings.degraded_toleration_secs).map_err(|_| {
            FleetOperatorError::InvalidConfig("degraded toleration out of range".to_string())
        })?;

        Ok(Self {
            release_version: settings.release_version.clone(),
            images: settings.images.clone(),
            operator_namespace: settings.operator_namespace.clone(),
            operand_namespace: settings.operand_namespace.clone(),
            config_namespace: settings.config_namespace.clone(),
            cluster_ip: cluster_ip.to_string(),
            cluster_domain: settings.cluster_domain.clone(),
            degraded_toleration: Duration::seconds(toleration_secs),
        })
    }
}

fn nth_address(network: IpNetwork, n: u32) -> Option<IpAddr> {
    match network {
        IpNetwork::V4(net) => {
            let addr = Ipv4Addr::from(u32::from(net.network()).checked_add(n)?);
            net.contains(addr).then_some(IpAddr::V4(addr))
        }
        IpNetwork::V6(net) => {
            let addr = Ipv6Addr::from(u128::from(net.network()).checked_add(u128::from(n))?);
            net.contains(addr).then_some(IpAddr::V6(addr))
        }
    }
}
