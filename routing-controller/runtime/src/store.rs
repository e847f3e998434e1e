//! Reads and writes the cluster's copies of routing objects.
//!
//! The reconciler only ever talks to the cluster through [`ObjectStore`], so that it can be driven
//! against an in-memory cluster in tests.

use crate::k8s::{
    Ingress, OAuthClient, Resource, ResourceExt, Route, RoutingInstance, RoutingInstanceStatus,
    Service,
};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[cfg(test)]
pub(crate) mod fake;

/// A resource type the controller reads or writes.
pub trait ClusterObject:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Returns an API scoped to `namespace`, or to the whole cluster.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetches an object, returning `None` if it does not exist.
    async fn get<K: ClusterObject>(&self, namespace: Option<&str>, name: &str)
        -> kube::Result<Option<K>>;

    /// Lists the objects matching a label selector.
    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> kube::Result<Vec<K>>;

    async fn create<K: ClusterObject>(&self, obj: &K) -> kube::Result<K>;

    /// Replaces an object. Fails with a conflict if the object's resource
    /// version is stale.
    async fn replace<K: ClusterObject>(&self, obj: &K) -> kube::Result<K>;

    /// Replaces the status of a routing instance as it was read. Fails with a
    /// conflict if the instance changed since.
    async fn update_status(
        &self,
        instance: &RoutingInstance,
        status: &RoutingInstanceStatus,
    ) -> kube::Result<RoutingInstance>;

    /// Deletes an object. Deleting an absent object succeeds.
    async fn delete<K: ClusterObject>(&self, namespace: Option<&str>, name: &str)
        -> kube::Result<()>;
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ClusterObject for $ty {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )+
    };
}

namespaced!(Ingress, Route, RoutingInstance, Service);

impl ClusterObject for OAuthClient {
    fn api(client: Client, _: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

// === impl Client ===

#[async_trait::async_trait]
impl ObjectStore for Client {
    async fn get<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<Option<K>> {
        K::api(self.clone(), namespace).get_opt(name).await
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> kube::Result<Vec<K>> {
        let list = K::api(self.clone(), namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn create<K: ClusterObject>(&self, obj: &K) -> kube::Result<K> {
        K::api(self.clone(), obj.meta().namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> kube::Result<K> {
        K::api(self.clone(), obj.meta().namespace.as_deref())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
    }

    async fn update_status(
        &self,
        instance: &RoutingInstance,
        status: &RoutingInstanceStatus,
    ) -> kube::Result<RoutingInstance> {
        let patch = status_patch(instance, status)?;
        RoutingInstance::api(self.clone(), instance.namespace().as_deref())
            .patch_status(
                &instance.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
    }

    async fn delete<K: ClusterObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<()> {
        match K::api(self.clone(), namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if crate::error::is_not_found(&error) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

/// Builds a merge patch that turns the instance's status into `status`.
///
/// The patch carries the resource version the instance was read at, so that
/// the API server rejects it with a conflict if the instance changed since.
pub(crate) fn status_patch(
    instance: &RoutingInstance,
    status: &RoutingInstanceStatus,
) -> kube::Result<Value> {
    let current = serde_json::to_value(&instance.status).map_err(kube::Error::SerdeError)?;
    let desired = serde_json::to_value(status).map_err(kube::Error::SerdeError)?;
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": instance.resource_version() },
        "status": merge_diff(&current, &desired),
    }))
}

/// Computes an RFC 7386 merge patch from `from` to `to`.
///
/// Members missing from `to` are removed with explicit nulls. Arrays and
/// scalars are replaced whole.
fn merge_diff(from: &Value, to: &Value) -> Value {
    let (Value::Object(from), Value::Object(to)) = (from, to) else {
        return to.clone();
    };
    let mut patch = Map::new();
    for (key, value) in to {
        match from.get(key) {
            Some(prev) if prev == value => {}
            Some(prev) => {
                patch.insert(key.clone(), merge_diff(prev, value));
            }
            None => {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    for key in from.keys().filter(|k| !to.contains_key(*k)) {
        patch.insert(key.clone(), Value::Null);
    }
    Value::Object(patch)
}
