//! Well-known names, labels and annotations.

/// The only cluster DNS object the operator acts on.
pub const DEFAULT_DNS_NAME: &str = "default";

/// Name of the cluster operator status singleton.
pub const CLUSTER_OPERATOR_NAME: &str = "dns";

pub const DNS_FINALIZER: &str = "dns.operator.dnsfleet.io/dns-controller";

/// Scoping label; the value is the owning cluster DNS name.
pub const OWNING_DNS_LABEL: &str = "dns.operator.dnsfleet.io/owning-dns";

/// Pod selector label of the resolver daemonset.
pub const DAEMONSET_DNS_LABEL: &str = "dns.operator.dnsfleet.io/daemonset-dns";

/// Marks config maps that are copies of a user CA bundle.
pub const CA_BUNDLE_COPY_LABEL: &str = "dns.operator.dnsfleet.io/ca-bundle-copy";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "dnsfleet-operator";

pub const SERVING_CERT_ANNOTATION: &str = "service.alpha.dnsfleet.io/serving-cert-secret-name";

pub const COREFILE_KEY: &str = "Corefile";
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

/// The standalone node resolver daemonset superseded by the resolver daemonset.
pub const LEGACY_NODE_RESOLVER: &str = "node-resolver";

pub const RESOLVER_CONTAINER: &str = "dns";
pub const NODE_RESOLVER_CONTAINER: &str = "dns-node-resolver";
pub const METRICS_PROXY_CONTAINER: &str = "metrics-proxy";
pub const CONFIG_VOLUME: &str = "config-volume";
pub const METRICS_TLS_VOLUME: &str = "metrics-tls";

pub const SERVICE_ACCOUNT: &str = "dns";
pub const CLUSTER_ROLE: &str = "dnsfleet-dns";
pub const METRICS_ROLE: &str = "prometheus-k8s";

pub const OPERAND_OPERATOR: &str = "operator";
pub const OPERAND_CORE_RESOLVER: &str = "core-resolver";
pub const OPERAND_CLI_HELPER: &str = "cli-helper";
pub const OPERAND_METRICS_PROXY: &str = "metrics-proxy";

/// Directory CA bundle copies are mounted under in the resolver container.
pub const CA_MOUNT_ROOT: &str = "/etc/pki/dns.operator.dnsfleet.io";

fn dns_prefixed(dns_name: &str) -> String {
    format!("dns-{}", dns_name)
}

pub fn daemonset_name(dns_name: &str) -> String {
    dns_prefixed(dns_name)
}

pub fn service_name(dns_name: &str) -> String {
    dns_prefixed(dns_name)
}

pub fn configmap_name(dns_name: &str) -> String {
    dns_prefixed(dns_name)
}

pub fn network_policy_name(dns_name: &str) -> String {
    dns_prefixed(dns_name)
}

pub fn service_monitor_name(dns_name: &str) -> String {
    dns_prefixed(dns_name)
}

pub fn metrics_secret_name(dns_name: &str) -> String {
    format!("dns-{}-metrics-tls", dns_name)
}

pub fn ca_bundle_copy_name(source: &str) -> String {
    format!("ca-{}", source)
}

/// Directory the copy named `copy_name` is mounted at.
pub fn ca_mount_path(copy_name: &str) -> String {
    format!("{}/{}", CA_MOUNT_ROOT, copy_name)
}

pub fn ca_file_path(copy_name: &str) -> String {
    format!("{}/{}", ca_mount_path(copy_name), CA_BUNDLE_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_names() {
        assert_eq!(daemonset_name("default"), "dns-default");
        assert_eq!(service_name("default"), "dns-default");
        assert_eq!(configmap_name("default"), "dns-default");
        assert_eq!(metrics_secret_name("default"), "dns-default-metrics-tls");
        assert_eq!(ca_bundle_copy_name("corp-ca"), "ca-corp-ca");
        assert_eq!(
            ca_file_path("ca-corp-ca"),
            "/etc/pki/dns.operator.dnsfleet.io/ca-corp-ca/ca-bundle.crt"
        );
    }
}
