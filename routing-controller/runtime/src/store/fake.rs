//! An in-memory cluster that behaves like the API server where the
//! controller depends on it. Resource versions guard writes, status is merge
//! patched separately, and finalizers hold deletions.

use super::{status_patch, ClusterObject, ObjectStore};
use crate::{
    error::api_error,
    k8s::{ResourceExt, RoutingInstance, RoutingInstanceStatus},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

type Key = (String, Option<String>, String);

#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    state: Mutex<State>,
}

/// Counts the writes made through the [`ObjectStore`] interface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Writes {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Create,
    Replace,
    UpdateStatus,
    Delete,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    writes: Writes,
    failures: Vec<(Op, u16)>,
}

// === impl FakeStore ===

impl FakeStore {
    /// Stores an object as-is, without counting a write.
    pub(crate) fn insert<K: ClusterObject>(&self, obj: K) -> K {
        let mut state = self.state.lock();
        let mut value = serde_json::to_value(&obj).expect("object must serialize");
        state.bump(&mut value);
        let key = key::<K>(obj.meta().namespace.as_deref(), &name(&value));
        state.objects.insert(key, value.clone());
        serde_json::from_value(value).expect("object must deserialize")
    }

    pub(crate) fn get_obj<K: ClusterObject>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.state.lock();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).expect("object must deserialize"))
    }

    pub(crate) fn all<K: ClusterObject>(&self) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, v)| serde_json::from_value(v.clone()).expect("object must deserialize"))
            .collect()
    }

    pub(crate) fn writes(&self) -> Writes {
        self.state.lock().writes
    }

    /// Fails the next `op` with an API error carrying `code`.
    pub(crate) fn fail_next(&self, op: Op, code: u16) {
        self.state.lock().failures.push((op, code));
    }
}

#[async_trait::async_trait]
impl ObjectStore for FakeStore {
    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<Option<K>> {
        let state = self.state.lock();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| decode(v.clone()))
            .transpose()
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> kube::Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .filter(|(_, v)| selects(selector, &v["metadata"]["labels"]))
            .map(|(_, v)| decode(v.clone()))
            .collect()
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> kube::Result<K> {
        let mut state = self.state.lock();
        state.fail(Op::Create)?;

        let mut value = encode(obj)?;
        let key = key::<K>(obj.meta().namespace.as_deref(), &name(&value));
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        value["metadata"]["uid"] = Value::String(format!("uid-{}", key.2));
        state.bump(&mut value);
        state.objects.insert(key, value.clone());
        state.writes.creates += 1;
        decode(value)
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> kube::Result<K> {
        let mut state = self.state.lock();
        state.fail(Op::Replace)?;

        let mut value = encode(obj)?;
        let key = key::<K>(obj.meta().namespace.as_deref(), &name(&value));
        let stored = state.current(&key, &value)?;

        // Status is only written through the status subresource.
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("status");
                }
            }
        }
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["deletionTimestamp"] = stored["metadata"]["deletionTimestamp"].clone();
        state.bump(&mut value);
        state.writes.updates += 1;

        if !value["metadata"]["deletionTimestamp"].is_null() && !has_finalizers(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value.clone());
        }
        decode(value)
    }

    async fn update_status(
        &self,
        instance: &RoutingInstance,
        status: &RoutingInstanceStatus,
    ) -> kube::Result<RoutingInstance> {
        let mut state = self.state.lock();
        state.fail(Op::UpdateStatus)?;

        let patch = status_patch(instance, status)?;
        let key = key::<RoutingInstance>(instance.metadata.namespace.as_deref(), &instance.name_any());
        let mut stored = state.current(&key, &patch)?;
        merge_patch(&mut stored, &patch);
        state.bump(&mut stored);
        state.objects.insert(key, stored.clone());
        state.writes.updates += 1;
        decode(stored)
    }

    async fn delete<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<()> {
        let mut state = self.state.lock();
        state.fail(Op::Delete)?;

        let key = key::<K>(namespace, name);
        let Some(mut value) = state.objects.remove(&key) else {
            return Ok(());
        };
        state.writes.deletes += 1;
        if has_finalizers(&value) {
            value["metadata"]["deletionTimestamp"] =
                Value::String("2026-01-01T00:00:00Z".to_string());
            state.bump(&mut value);
            state.objects.insert(key, value);
        }
        Ok(())
    }
}

// === impl State ===

impl State {
    fn fail(&mut self, op: Op) -> kube::Result<()> {
        if let Some(idx) = self.failures.iter().position(|(o, _)| *o == op) {
            let (_, code) = self.failures.remove(idx);
            return Err(api_error(code, "Injected"));
        }
        Ok(())
    }

    fn bump(&mut self, value: &mut Value) {
        self.version += 1;
        value["metadata"]["resourceVersion"] = Value::String(self.version.to_string());
    }

    /// Returns the stored copy of an object that is about to be written,
    /// enforcing optimistic concurrency.
    fn current(&self, key: &Key, value: &Value) -> kube::Result<Value> {
        let stored = self
            .objects
            .get(key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        let version = &value["metadata"]["resourceVersion"];
        if !version.is_null() && *version != stored["metadata"]["resourceVersion"] {
            return Err(api_error(409, "Conflict"));
        }
        Ok(stored.clone())
    }
}

fn key<K: ClusterObject>(namespace: Option<&str>, name: &str) -> Key {
    (
        K::kind(&()).to_string(),
        namespace.map(Into::into),
        name.to_string(),
    )
}

fn name(value: &Value) -> String {
    value["metadata"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

/// Applies an RFC 7386 merge patch.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Matches equality (`k=v`) and existence (`k`) selectors.
fn selects(selector: &str, labels: &Value) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels[k].as_str() == Some(v),
            None => !labels[term].is_null(),
        })
}

fn encode<K: ClusterObject>(obj: &K) -> kube::Result<Value> {
    serde_json::to_value(obj).map_err(kube::Error::SerdeError)
}

fn decode<K: ClusterObject>(value: Value) -> kube::Result<K> {
    serde_json::from_value(value).map_err(kube::Error::SerdeError)
}
