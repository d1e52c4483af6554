use kube::ResourceExt;
use serde_json::{json, Value};

use super::crd::ClusterDns;
use crate::error::FleetOperatorResult;
use crate::k8s::names::DNS_FINALIZER;
use crate::store::{ObjectKey, ObjectStore};

pub fn has_finalizer(dns: &ClusterDns) -> bool {
    dns.finalizers().iter().any(|f| f == DNS_FINALIZER)
}

/// Writes the complete finalizer list. The resourceVersion makes the patch fail
/// rather than clobber a list someone else changed in the meantime.
async fn write_finalizers<S: ObjectStore>(
    store: &S,
    dns: &ClusterDns,
    finalizers: Vec<String>,
) -> FleetOperatorResult<ClusterDns> {
    let finalizers: Value = if finalizers.is_empty() {
        Value::Null
    } else {
        json!(finalizers)
    };
    let patch: Value = json!({
      "metadata": {
        "resourceVersion": dns.resource_version(),
        "finalizers": finalizers
      }
    });
    store
        .merge_patch(&ObjectKey::cluster(dns.name_any()), &patch)
        .await
}

pub async fn add<S: ObjectStore>(store: &S, dns: &ClusterDns) -> FleetOperatorResult<ClusterDns> {
    let mut finalizers = dns.finalizers().to_vec();
    finalizers.push(DNS_FINALIZER.to_string());
    write_finalizers(store, dns, finalizers).await
}

pub async fn remove<S: ObjectStore>(
    store: &S,
    dns: &ClusterDns,
) -> FleetOperatorResult<ClusterDns> {
    let finalizers = dns
        .finalizers()
        .iter()
        .filter(|f| *f != DNS_FINALIZER)
        .cloned()
        .collect();
    write_finalizers(store, dns, finalizers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::crd::ClusterDnsSpec;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_add_and_remove_keep_foreign_finalizers() {
        let store = MemoryStore::new();
        let mut dns = ClusterDns::new("default", ClusterDnsSpec::default());
        dns.metadata.finalizers = Some(vec!["example.com/audit".to_string()]);
        let dns = store.seed(&dns).unwrap();
        assert!(!has_finalizer(&dns));

        let dns = add(&store, &dns).await.unwrap();
        assert!(has_finalizer(&dns));
        assert_eq!(dns.finalizers().len(), 2);

        let dns = remove(&store, &dns).await.unwrap();
        assert!(!has_finalizer(&dns));
        assert_eq!(dns.finalizers(), ["example.com/audit".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_finalizer_patch_conflicts() {
        let store = MemoryStore::new();
        let dns = store
            .seed(&ClusterDns::new("default", ClusterDnsSpec::default()))
            .unwrap();
        add(&store, &dns).await.unwrap();

        let err = add(&store, &dns).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
