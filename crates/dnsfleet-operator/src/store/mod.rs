//! Typed access to the objects the operator reads and writes.
//!
//! Reconcile logic only ever talks to an [`ObjectStore`]; the cluster is reached
//! through [`KubeStore`] and tests use the in-memory [`MemoryStore`].

mod cluster;
mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::{Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::FleetOperatorResult;
use crate::k8s::service_monitor::ServiceMonitor;
use crate::operator::crd::{ClusterDns, ClusterOperator};

pub use cluster::KubeStore;
pub use memory::{MemoryStore, Verb, WriteRecord};

/// A statically typed kind the operator manages.
pub trait Managed:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    /// `apiVersion/kind`, used to key objects of this type.
    fn type_key() -> String {
        format!("{}/{}", Self::api_version(&()), Self::kind(&()))
    }
}

macro_rules! namespaced {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Managed for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(namespace) => Api::namespaced(client, namespace),
                        None => Api::all(client),
                    }
                }
            }
        )*
    };
}

macro_rules! cluster_scoped {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Managed for $kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

namespaced!(
    DaemonSet,
    ConfigMap,
    Service,
    ServiceAccount,
    Pod,
    NetworkPolicy,
    Role,
    RoleBinding,
    ServiceMonitor,
);

cluster_scoped!(
    Namespace,
    ClusterRole,
    ClusterRoleBinding,
    ClusterDns,
    ClusterOperator,
);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Reads and writes against the platform API.
///
/// Writes use optimistic concurrency: `update` and `update_status` carry the
/// object's `resourceVersion` and fail with a conflict when it is stale.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<Option<K>>;

    /// Objects of kind `K` in `namespace` (all namespaces when `None`) carrying
    /// every label in `labels`.
    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> FleetOperatorResult<Vec<K>>;

    async fn create<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K>;

    async fn update<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K>;

    async fn update_status<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K>;

    /// JSON merge patch (RFC 7386).
    async fn merge_patch<K: Managed>(&self, key: &ObjectKey, patch: &Value)
        -> FleetOperatorResult<K>;

    /// Deletes with background propagation. `Ok(false)` when nothing was there.
    async fn delete<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<bool>;
}
