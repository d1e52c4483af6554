use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use serde_json::{json, Value};

use super::{Managed, ObjectKey, ObjectStore};
use crate::error::{FleetOperatorError, FleetOperatorResult};

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<Option<K>> {
        let api = K::api(self.client.clone(), key.namespace());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> FleetOperatorResult<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        Ok(api.list(&params).await?.items)
    }

    async fn create<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        Ok(api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .ok_or_else(|| {
                FleetOperatorError::Runtime(anyhow::anyhow!(
                    "{} {} has no status to write",
                    K::kind(&()),
                    obj.name_any()
                ))
            })?;
        // Carrying the resourceVersion turns the merge patch into a conditional write.
        let patch: Value = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        Ok(api
            .patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn merge_patch<K: Managed>(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> FleetOperatorResult<K> {
        let api = K::api(self.client.clone(), key.namespace());
        Ok(api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<bool> {
        let api = K::api(self.client.clone(), key.namespace());
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
