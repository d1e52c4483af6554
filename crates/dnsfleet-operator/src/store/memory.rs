use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::error::ErrorResponse;
use serde_json::{json, Map, Value};

use super::{Managed, ObjectKey, ObjectStore};
use crate::error::{FleetOperatorError, FleetOperatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    UpdateStatus,
    Patch,
    Delete,
}

/// One successful write against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

type StoreKey = (String, ObjectKey);

#[derive(Debug)]
struct InjectedFailure {
    verb: Verb,
    kind: String,
    code: u16,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<StoreKey, Value>,
    writes: Vec<WriteRecord>,
    revision: u64,
    failures: Vec<InjectedFailure>,
}

/// In-memory [`ObjectStore`] that behaves like the API server where reconcile
/// logic can tell the difference: resource versions, status subresources,
/// finalizers holding back deletion and owner-reference cascades.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn api_error(code: u16, reason: &str, message: String) -> FleetOperatorError {
    FleetOperatorError::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn not_found(kind: &str, key: &ObjectKey) -> FleetOperatorError {
    api_error(404, "NotFound", format!("{} {} not found", kind, key))
}

fn resource_version(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn finalizers_empty(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .map_or(true, Vec::is_empty)
}

fn is_deleting(value: &Value) -> bool {
    value
        .pointer("/metadata/deletionTimestamp")
        .map_or(false, |ts| !ts.is_null())
}

fn owned_by_uid(value: &Value, uid: &str) -> bool {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map_or(false, |owners| {
            owners
                .iter()
                .any(|owner| owner.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn merge_json(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        merge_json(map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Copies server-owned metadata from the stored object onto an incoming write.
fn keep_server_fields(incoming: &mut Value, stored: &Value) {
    for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
        match stored.pointer(&format!("/metadata/{}", field)) {
            Some(value) => incoming["metadata"][field] = value.clone(),
            None => {
                if let Some(meta) = incoming.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.remove(field);
                }
            }
        }
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check_injected(&mut self, verb: Verb, kind: &str, key: &ObjectKey) -> FleetOperatorResult {
        let position = self
            .failures
            .iter()
            .position(|failure| failure.verb == verb && failure.kind == kind);
        match position {
            Some(position) => {
                let failure = self.failures.remove(position);
                Err(api_error(
                    failure.code,
                    "Injected",
                    format!("injected failure for {:?} {} {}", verb, kind, key),
                ))
            }
            None => Ok(()),
        }
    }

    fn check_version(&self, kind: &str, key: &ObjectKey, incoming: &Value, stored: &Value) -> FleetOperatorResult {
        match resource_version(incoming) {
            Some(version) if Some(version) != resource_version(stored) => Err(api_error(
                409,
                "Conflict",
                format!(
                    "Operation cannot be fulfilled on {} {}: the object has been modified",
                    kind, key
                ),
            )),
            _ => Ok(()),
        }
    }

    fn record(&mut self, verb: Verb, kind: &str, key: ObjectKey) {
        self.writes.push(WriteRecord {
            verb,
            kind: kind.to_string(),
            key,
        });
    }

    /// Drops the object once it is deleting and nothing holds it back.
    fn release_if_finalized(&mut self, store_key: &StoreKey) {
        let released = self
            .objects
            .get(store_key)
            .map_or(false, |value| is_deleting(value) && finalizers_empty(value));
        if released {
            self.remove_cascade(store_key);
        }
    }

    fn remove_cascade(&mut self, store_key: &StoreKey) {
        let mut pending = vec![store_key.clone()];
        while let Some(key) = pending.pop() {
            let Some(removed) = self.objects.remove(&key) else {
                continue;
            };
            let Some(uid) = removed.pointer("/metadata/uid").and_then(Value::as_str) else {
                continue;
            };
            pending.extend(
                self.objects
                    .iter()
                    .filter(|(_, value)| owned_by_uid(value, uid))
                    .map(|(key, _)| key.clone()),
            );
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or overwrites an object without recording a write, as if another
    /// actor had put it there.
    pub fn seed<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj)?;
        let mut state = self.lock();
        let version = state.next_version();
        value["metadata"]["resourceVersion"] = json!(version);
        if value.pointer("/metadata/uid").map_or(true, Value::is_null) {
            value["metadata"]["uid"] = json!(format!("uid-{}", version));
        }
        state.objects.insert((K::type_key(), key), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Synchronous read for assertions.
    pub fn object<K: Managed>(&self, key: &ObjectKey) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&(K::type_key(), key.clone()))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Makes the next `verb` on objects of `kind` fail with the given HTTP code.
    pub fn fail_next(&self, verb: Verb, kind: &str, code: u16) {
        self.lock().failures.push(InjectedFailure {
            verb,
            kind: kind.to_string(),
            code,
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<Option<K>> {
        let value = self
            .lock()
            .objects
            .get(&(K::type_key(), key.clone()))
            .cloned();
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> FleetOperatorResult<Vec<K>> {
        let type_key = K::type_key();
        let matching: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((kind, key), _)| {
                *kind == type_key && namespace.map_or(true, |ns| key.namespace() == Some(ns))
            })
            .filter(|(_, value)| {
                labels.iter().all(|(label, expected)| {
                    value
                        .pointer("/metadata/labels")
                        .and_then(|labels| labels.get(label))
                        .and_then(Value::as_str)
                        == Some(expected.as_str())
                })
            })
            .map(|(_, value)| value.clone())
            .collect();

        matching
            .into_iter()
            .map(|value| Ok(serde_json::from_value(value)?))
            .collect()
    }

    async fn create<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let kind = K::kind(&()).to_string();
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj)?;

        let mut state = self.lock();
        state.check_injected(Verb::Create, &kind, &key)?;
        let store_key = (K::type_key(), key.clone());
        if state.objects.contains_key(&store_key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {} already exists", kind, key),
            ));
        }

        let version = state.next_version();
        value["metadata"]["resourceVersion"] = json!(version);
        value["metadata"]["uid"] = json!(format!("uid-{}", version));
        state.objects.insert(store_key, value.clone());
        state.record(Verb::Create, &kind, key);
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let kind = K::kind(&()).to_string();
        let key = ObjectKey::of(obj);
        let mut value = serde_json::to_value(obj)?;

        let mut state = self.lock();
        state.check_injected(Verb::Update, &kind, &key)?;
        let store_key = (K::type_key(), key.clone());
        let stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| not_found(&kind, &key))?;
        state.check_version(&kind, &key, &value, &stored)?;

        keep_server_fields(&mut value, &stored);
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(store_key.clone(), value.clone());
        state.record(Verb::Update, &kind, key);
        state.release_if_finalized(&store_key);
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: Managed>(&self, obj: &K) -> FleetOperatorResult<K> {
        let kind = K::kind(&()).to_string();
        let key = ObjectKey::of(obj);
        let value = serde_json::to_value(obj)?;

        let mut state = self.lock();
        state.check_injected(Verb::UpdateStatus, &kind, &key)?;
        let store_key = (K::type_key(), key.clone());
        let mut stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| not_found(&kind, &key))?;
        state.check_version(&kind, &key, &value, &stored)?;

        stored["status"] = value.get("status").cloned().unwrap_or(Value::Null);
        stored["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(store_key, stored.clone());
        state.record(Verb::UpdateStatus, &kind, key);
        Ok(serde_json::from_value(stored)?)
    }

    async fn merge_patch<K: Managed>(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> FleetOperatorResult<K> {
        let kind = K::kind(&()).to_string();

        let mut state = self.lock();
        state.check_injected(Verb::Patch, &kind, key)?;
        let store_key = (K::type_key(), key.clone());
        let mut stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| not_found(&kind, key))?;
        state.check_version(&kind, key, patch, &stored)?;

        let server_fields = stored.clone();
        merge_json(&mut stored, patch);
        keep_server_fields(&mut stored, &server_fields);
        stored["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(store_key.clone(), stored.clone());
        state.record(Verb::Patch, &kind, key.clone());
        state.release_if_finalized(&store_key);
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<K: Managed>(&self, key: &ObjectKey) -> FleetOperatorResult<bool> {
        let kind = K::kind(&()).to_string();

        let mut state = self.lock();
        state.check_injected(Verb::Delete, &kind, key)?;
        let store_key = (K::type_key(), key.clone());
        let Some(mut stored) = state.objects.get(&store_key).cloned() else {
            return Ok(false);
        };

        if finalizers_empty(&stored) {
            state.remove_cascade(&store_key);
        } else if !is_deleting(&stored) {
            stored["metadata"]["deletionTimestamp"] =
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
            stored["metadata"]["resourceVersion"] = json!(state.next_version());
            state.objects.insert(store_key, stored);
        }
        state.record(Verb::Delete, &kind, key.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("dns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("a")).await.unwrap();
        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("k".to_string(), "w".to_string())]));
        store.update(&first).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_create_existing_conflicts() {
        let store = MemoryStore::new();
        store.create(&config_map("a")).await.unwrap();
        assert!(store.create(&config_map("a")).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_finalizer_holds_back_deletion() {
        let store = MemoryStore::new();
        let mut cm = config_map("a");
        cm.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
        store.create(&cm).await.unwrap();
        let key = ObjectKey::namespaced("dns", "a");

        assert!(store.delete::<ConfigMap>(&key).await.unwrap());
        let held: ConfigMap = store.get(&key).await.unwrap().unwrap();
        assert!(held.metadata.deletion_timestamp.is_some());

        store
            .merge_patch::<ConfigMap>(&key, &json!({"metadata": {"finalizers": null}}))
            .await
            .unwrap();
        assert!(store.get::<ConfigMap>(&key).await.unwrap().is_none());
        assert!(!store.delete::<ConfigMap>(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_dependents() {
        let store = MemoryStore::new();
        let owner = store.create(&config_map("owner")).await.unwrap();
        let mut dependent = config_map("dependent");
        dependent.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "owner".to_string(),
            uid: owner.metadata.uid.clone().unwrap(),
            ..Default::default()
        }]);
        store.create(&dependent).await.unwrap();

        store
            .delete::<ConfigMap>(&ObjectKey::namespaced("dns", "owner"))
            .await
            .unwrap();
        assert!(store
            .object::<ConfigMap>(&ObjectKey::namespaced("dns", "dependent"))
            .is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let store = MemoryStore::new();
        let mut labeled = config_map("labeled");
        labeled.metadata.labels = Some(BTreeMap::from([("app".to_string(), "dns".to_string())]));
        store.create(&labeled).await.unwrap();
        store.create(&config_map("plain")).await.unwrap();

        let selector = BTreeMap::from([("app".to_string(), "dns".to_string())]);
        let found: Vec<ConfigMap> = store.list(Some("dns"), &selector).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("labeled"));

        let all: Vec<ConfigMap> = store.list(None, &BTreeMap::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(Verb::Create, "ConfigMap", 500);
        assert!(store.create(&config_map("a")).await.is_err());
        assert!(store.create(&config_map("a")).await.is_ok());
    }
}
