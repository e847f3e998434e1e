//! Converges the cluster's copies of routing objects toward the objects a
//! solver wants.

use crate::{
    error::{is_conflict, is_not_found},
    k8s::{labels, Ingress, ObjectMeta, ResourceExt, Route, Service},
    metrics::{ControllerMetrics, Write},
    solvers::SolverError,
    store::{ClusterObject, ObjectStore},
    Error,
};
use tracing::debug;

/// An object kind the controller keeps in sync.
pub(crate) trait Synced: ClusterObject {
    const KIND: &'static str;

    /// Whether the fields the controller owns match on both copies.
    fn spec_matches(&self, cluster: &Self) -> bool;

    /// Writes the fields the controller owns onto the cluster's copy,
    /// leaving fields assigned by the cluster alone.
    fn apply_spec(&self, cluster: &mut Self);

    /// Fails if an object of the same name on the cluster belongs to
    /// someone else.
    fn check_occupant(&self, _cluster: &Self) -> Result<(), SolverError> {
        Ok(())
    }
}

/// Syncs every object of one kind for a workspace.
///
/// Objects labeled with the workspace's id that are no longer desired are
/// deleted. Returns the cluster's copies only if every object was already in
/// sync; otherwise some write was made (or lost a race) and the caller should
/// retry.
pub(crate) async fn sync_all<K: Synced, S: ObjectStore>(
    store: &S,
    metrics: &ControllerMetrics,
    namespace: Option<&str>,
    workspace_id: &str,
    desired: Vec<K>,
) -> Result<Option<Vec<K>>, Error> {
    let selector = labels::workspace_selector(workspace_id);
    let existing = store.list::<K>(namespace, &selector).await?;
    let mut in_sync = true;

    for stale in existing
        .iter()
        .filter(|obj| !desired.iter().any(|d| d.name_any() == obj.name_any()))
    {
        let name = stale.name_any();
        debug!(kind = K::KIND, %name, "Deleting stale object");
        store.delete::<K>(namespace, &name).await?;
        metrics.wrote(K::KIND, Write::Delete);
        in_sync = false;
    }

    let mut synced = Vec::with_capacity(desired.len());
    for obj in desired {
        let name = obj.name_any();
        let current = match existing.iter().find(|e| e.name_any() == name) {
            Some(current) => Some(current.clone()),
            // The object may exist without the workspace's label.
            None => store.get::<K>(namespace, &name).await?,
        };
        match sync_one(store, metrics, obj, current).await? {
            Some(cluster) => synced.push(cluster),
            None => in_sync = false,
        }
    }

    Ok(in_sync.then_some(synced))
}

/// Deletes every object of one kind labeled with the workspace's id.
pub(crate) async fn delete_all<K: Synced, S: ObjectStore>(
    store: &S,
    metrics: &ControllerMetrics,
    namespace: Option<&str>,
    workspace_id: &str,
) -> Result<(), Error> {
    let selector = labels::workspace_selector(workspace_id);
    for obj in store.list::<K>(namespace, &selector).await? {
        let name = obj.name_any();
        debug!(kind = K::KIND, %name, "Deleting object");
        store.delete::<K>(namespace, &name).await?;
        metrics.wrote(K::KIND, Write::Delete);
    }
    Ok(())
}

async fn sync_one<K: Synced, S: ObjectStore>(
    store: &S,
    metrics: &ControllerMetrics,
    desired: K,
    current: Option<K>,
) -> Result<Option<K>, Error> {
    let name = desired.name_any();

    let Some(current) = current else {
        return match store.create(&desired).await {
            Ok(_) => {
                debug!(kind = K::KIND, %name, "Created");
                metrics.wrote(K::KIND, Write::Create);
                Ok(None)
            }
            Err(error) if is_conflict(&error) => {
                debug!(kind = K::KIND, %name, "Object already exists");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        };
    };

    desired.check_occupant(&current)?;
    if metadata_matches(desired.meta(), current.meta()) && desired.spec_matches(&current) {
        return Ok(Some(current));
    }

    let mut updated = current;
    apply_metadata(desired.meta(), updated.meta_mut());
    desired.apply_spec(&mut updated);
    match store.replace(&updated).await {
        Ok(_) => {
            debug!(kind = K::KIND, %name, "Updated");
            metrics.wrote(K::KIND, Write::Update);
            Ok(None)
        }
        // Not found if the object was deleted after it was read.
        Err(error) if is_conflict(&error) || is_not_found(&error) => {
            debug!(kind = K::KIND, %name, %error, "Update lost a race");
            Ok(None)
        }
        Err(error) => Err(error.into()),
    }
}

/// Labels and annotations set on the cluster by others are preserved.
fn metadata_matches(desired: &ObjectMeta, cluster: &ObjectMeta) -> bool {
    let contains = |want: &Option<labels::Map>, have: &Option<labels::Map>| {
        want.iter()
            .flatten()
            .all(|(k, v)| have.as_ref().and_then(|h| h.get(k)) == Some(v))
    };
    contains(&desired.labels, &cluster.labels)
        && contains(&desired.annotations, &cluster.annotations)
        && (desired.owner_references.is_none()
            || desired.owner_references == cluster.owner_references)
}

fn apply_metadata(desired: &ObjectMeta, cluster: &mut ObjectMeta) {
    if let Some(labels) = desired.labels.as_ref() {
        cluster
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels.clone());
    }
    if let Some(annotations) = desired.annotations.as_ref() {
        cluster
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.clone());
    }
    if desired.owner_references.is_some() {
        cluster.owner_references = desired.owner_references.clone();
    }
}

// === impl Service ===

impl Synced for Service {
    const KIND: &'static str = "Service";

    fn spec_matches(&self, cluster: &Self) -> bool {
        let ports = |svc: &Service| {
            let mut ports = svc
                .spec
                .iter()
                .flat_map(|s| s.ports.iter().flatten())
                .map(|p| (p.name.clone(), p.port, p.target_port.clone()))
                .collect::<Vec<_>>();
            ports.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
            ports
        };
        let selector = |svc: &Service| svc.spec.as_ref().and_then(|s| s.selector.clone());
        ports(self) == ports(cluster) && selector(self) == selector(cluster)
    }

    fn apply_spec(&self, cluster: &mut Self) {
        let desired = self.spec.clone().unwrap_or_default();
        // The cluster IP is immutable once assigned.
        let spec = cluster.spec.get_or_insert_with(Default::default);
        spec.ports = desired.ports;
        spec.selector = desired.selector;
    }

    fn check_occupant(&self, cluster: &Self) -> Result<(), SolverError> {
        let discoverable = self
            .annotations()
            .get(labels::DISCOVERABLE_SERVICE)
            .is_some_and(|v| v == "true");
        let owner = |svc: &Service| svc.labels().get(labels::WORKSPACE_ID).cloned();
        if discoverable && owner(self) != owner(cluster) {
            return Err(SolverError::ServiceConflict {
                endpoint_name: self.name_any(),
                workspace_name: cluster.labels().get(labels::WORKSPACE_NAME).cloned(),
            });
        }
        Ok(())
    }
}

// === impl Ingress ===

impl Synced for Ingress {
    const KIND: &'static str = "Ingress";

    // The ingress class may be defaulted by an admission controller.
    fn spec_matches(&self, cluster: &Self) -> bool {
        let rules = |ing: &Ingress| {
            let spec = ing.spec.clone().unwrap_or_default();
            (spec.rules, spec.tls)
        };
        rules(self) == rules(cluster)
    }

    fn apply_spec(&self, cluster: &mut Self) {
        let desired = self.spec.clone().unwrap_or_default();
        let spec = cluster.spec.get_or_insert_with(Default::default);
        spec.rules = desired.rules;
        spec.tls = desired.tls;
    }
}

// === impl Route ===

impl Synced for Route {
    const KIND: &'static str = "Route";

    // Backend weights are defaulted by the API server, and hosts may be
    // assigned by the router.
    fn spec_matches(&self, cluster: &Self) -> bool {
        let (want, have) = (&self.spec, &cluster.spec);
        (want.host.is_none() || want.host == have.host)
            && want.path == have.path
            && want.to.kind == have.to.kind
            && want.to.name == have.to.name
            && want.port == have.port
            && want.tls == have.tls
    }

    fn apply_spec(&self, cluster: &mut Self) {
        let desired = self.spec.clone();
        let spec = &mut cluster.spec;
        if desired.host.is_some() {
            spec.host = desired.host;
        }
        spec.path = desired.path;
        spec.to.kind = desired.to.kind;
        spec.to.name = desired.to.name;
        spec.port = desired.port;
        spec.tls = desired.tls;
    }
}
