//! Drives each routing instance toward the phase its endpoints allow.
//!
//! Reconciles are level-triggered: every pass recomputes the routing objects from the instance's
//! spec, syncs them in dependency order (Services, then Ingresses and Routes, then the OAuth
//! client), and resolves endpoint URLs from the cluster's copies. A pass that writes anything
//! requeues so that the next pass observes the result.

use crate::{
    error::{is_conflict, is_not_found},
    k8s::{
        Ingress, Resource, ResourceExt, Route, RoutingInstance, RoutingInstanceStatus,
        RoutingPhase, Service,
    },
    metrics::{ControllerMetrics, Outcome},
    oauth_client,
    solvers::{Dispatcher, RoutingMeta, RoutingObjects, SolverError},
    store::ObjectStore,
    sync, Error,
};
use kube::runtime::controller::Action;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, info_span, warn, Instrument};


/// The delay before retrying a reconcile that failed with an error.
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

const READY_MESSAGE: &str = "DevWorkspaceRouting prepared";
const PREPARING_MESSAGE: &str = "Waiting for endpoints to be assigned hosts";

/// State shared by every reconcile.
pub struct Context<S = kube::Client> {
    store: S,
    dispatcher: Dispatcher,
    metrics: ControllerMetrics,
}

type Reconciled = Result<(Outcome, Action), Error>;

/// The routing objects, as they exist on the cluster once in sync.
enum Converged {
    Synced(RoutingObjects),
    Pending(&'static str),
}

pub async fn reconcile<S: ObjectStore>(
    instance: Arc<RoutingInstance>,
    ctx: Arc<Context<S>>,
) -> Result<Action, Error> {
    let span = info_span!(
        "reconcile",
        namespace = %instance.namespace().unwrap_or_default(),
        name = %instance.name_any(),
        workspace_id = %instance.spec.workspace_id,
    );
    async move {
        match ctx.reconcile_instance(&instance).await {
            Ok((outcome, action)) => {
                ctx.metrics.reconciled(outcome);
                Ok(action)
            }
            Err(error) => {
                ctx.metrics.reconciled(Outcome::Error);
                Err(error)
            }
        }
    }
    .instrument(span)
    .await
}

pub fn error_policy<S>(instance: Arc<RoutingInstance>, error: &Error, _: Arc<Context<S>>) -> Action {
    warn!(
        namespace = %instance.namespace().unwrap_or_default(),
        name = %instance.name_any(),
        %error,
        "Failed to reconcile routing",
    );
    Action::requeue(ERROR_REQUEUE)
}

// === impl Context ===

impl<S: ObjectStore> Context<S> {
    pub fn new(store: S, dispatcher: Dispatcher, metrics: ControllerMetrics) -> Self {
        Self {
            store,
            dispatcher,
            metrics,
        }
    }

    async fn reconcile_instance(&self, instance: &RoutingInstance) -> Reconciled {
        if instance.metadata.deletion_timestamp.is_some() {
            return self.finalize(instance).await;
        }

        let solver = match self.dispatcher.solver(&instance.spec.routing_class) {
            Ok(solver) => solver,
            Err(SolverError::NotSupported { class }) => {
                debug!(%class, "Routing class is not handled by this controller");
                return Ok((Outcome::Ignored, Action::await_change()));
            }
            Err(error) => return self.solver_error(instance, error).await,
        };

        if instance.phase() == Some(RoutingPhase::Failed)
            && observed_generation(instance) == instance.metadata.generation
        {
            debug!("Routing failed for this generation");
            return Ok((Outcome::Failed, Action::await_change()));
        }

        let mut instance = instance.clone();
        if solver.finalizer_required() && !instance.has_finalizer() {
            info!("Adding finalizer");
            instance
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(RoutingInstance::FINALIZER.to_string());
            instance = match self.store.replace(&instance).await {
                Ok(instance) => instance,
                Err(error) if is_conflict(&error) => return requeue("Instance changed"),
                Err(error) => return Err(error.into()),
            };
        }

        let meta = match RoutingMeta::new(&instance, self.dispatcher.config()) {
            Ok(meta) => meta,
            Err(error) => return self.solver_error(&instance, error).await,
        };
        let mut objects = match solver.spec_objects(&instance.spec.endpoints, &meta) {
            Ok(objects) => objects,
            Err(error) => return self.solver_error(&instance, error).await,
        };
        set_owner(&instance, &mut objects);
        let pod_additions = objects.pod_additions.take();

        let cluster = match self.converge(&meta, objects).await {
            Ok(Converged::Synced(cluster)) => cluster,
            Ok(Converged::Pending(reason)) => return requeue(reason),
            Err(Error::Solver(error)) => return self.solver_error(&instance, error).await,
            Err(error) if error.is_invalid() => {
                return self.fail(&instance, error.to_string()).await
            }
            Err(error) => return Err(error),
        };

        let (exposed_endpoints, ready) =
            match solver.exposed_endpoints(&instance.spec.endpoints, &meta, &cluster) {
                Ok(exposed) => exposed,
                Err(error) => return self.solver_error(&instance, error).await,
            };

        let current = instance.status.clone().unwrap_or_default();
        if !ready {
            let status = RoutingInstanceStatus {
                phase: Some(RoutingPhase::Preparing),
                message: Some(PREPARING_MESSAGE.to_string()),
                observed_generation: instance.metadata.generation,
                ..current
            };
            if !self.update_status(&instance, status).await? {
                return requeue("Instance changed");
            }
            debug!("Endpoints are not ready");
            return Ok((
                Outcome::Preparing,
                Action::requeue(SolverError::DEFAULT_RETRY),
            ));
        }

        let status = RoutingInstanceStatus {
            phase: Some(RoutingPhase::Ready),
            pod_additions,
            exposed_endpoints,
            message: Some(READY_MESSAGE.to_string()),
            observed_generation: instance.metadata.generation,
        };
        if current != status {
            info!("Routing is ready");
        }
        if !self.update_status(&instance, status).await? {
            return requeue("Instance changed");
        }
        Ok((Outcome::Ready, Action::await_change()))
    }

    /// Syncs the routing objects in the order in which they reference each
    /// other.
    async fn converge(
        &self,
        meta: &RoutingMeta,
        objects: RoutingObjects,
    ) -> Result<Converged, Error> {
        let RoutingObjects {
            services,
            ingresses,
            routes,
            pod_additions: _,
            oauth_client,
        } = objects;
        let namespace = Some(meta.namespace.as_str());
        let id = meta.workspace_id.as_str();
        let openshift = self.dispatcher.config().platform.is_openshift();

        let Some(services) = self.sync::<Service>(namespace, id, services).await? else {
            return Ok(Converged::Pending("Services not in sync"));
        };
        let Some(ingresses) = self.sync::<Ingress>(namespace, id, ingresses).await? else {
            return Ok(Converged::Pending("Ingresses not in sync"));
        };
        let routes = if openshift {
            let Some(routes) = self.sync::<Route>(namespace, id, routes).await? else {
                return Ok(Converged::Pending("Routes not in sync"));
            };
            routes
        } else {
            Vec::new()
        };
        if openshift
            && !oauth_client::sync(&self.store, &self.metrics, id, oauth_client.clone()).await?
        {
            return Ok(Converged::Pending("OAuth client not in sync"));
        }

        Ok(Converged::Synced(RoutingObjects {
            services,
            ingresses,
            routes,
            pod_additions: None,
            oauth_client,
        }))
    }

    async fn sync<K: sync::Synced>(
        &self,
        namespace: Option<&str>,
        workspace_id: &str,
        desired: Vec<K>,
    ) -> Result<Option<Vec<K>>, Error> {
        sync::sync_all(&self.store, &self.metrics, namespace, workspace_id, desired).await
    }

    /// Removes the instance's cluster-scoped objects and then its finalizer.
    async fn finalize(&self, instance: &RoutingInstance) -> Reconciled {
        if !instance.has_finalizer() {
            return Ok((Outcome::Ignored, Action::await_change()));
        }

        info!("Finalizing routing");
        if self.dispatcher.config().platform.is_openshift() {
            oauth_client::delete_all(&self.store, &self.metrics, &instance.spec.workspace_id)
                .await?;
        }

        let mut instance = instance.clone();
        if let Some(finalizers) = instance.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != RoutingInstance::FINALIZER);
        }
        match self.store.replace(&instance).await {
            Ok(_) => Ok((Outcome::Finalized, Action::await_change())),
            Err(error) if is_conflict(&error) => requeue("Instance changed"),
            Err(error) if is_not_found(&error) => Ok((Outcome::Finalized, Action::await_change())),
            Err(error) => Err(error.into()),
        }
    }

    async fn solver_error(&self, instance: &RoutingInstance, error: SolverError) -> Reconciled {
        if let Some(delay) = error.retry_after() {
            debug!(?delay, "Controller not ready for routing");
            return Ok((Outcome::Requeued, Action::requeue(delay)));
        }
        if error.is_terminal() {
            let message = match error {
                SolverError::Invalid { reason } => reason,
                error => error.to_string(),
            };
            return self.fail(instance, message).await;
        }
        debug!(%error, "Ignoring routing");
        Ok((Outcome::Ignored, Action::await_change()))
    }

    async fn fail(&self, instance: &RoutingInstance, message: String) -> Reconciled {
        let status = RoutingInstanceStatus {
            phase: Some(RoutingPhase::Failed),
            message: Some(message),
            observed_generation: instance.metadata.generation,
            ..instance.status.clone().unwrap_or_default()
        };
        if instance.status.as_ref() != Some(&status) {
            warn!(reason = ?status.message, "Routing failed");
        }
        if !self.update_status(instance, status).await? {
            return requeue("Instance changed");
        }
        Ok((Outcome::Failed, Action::await_change()))
    }

    /// Writes `status` unless the instance already has it. Returns `false` if
    /// the instance changed since it was read.
    async fn update_status(
        &self,
        instance: &RoutingInstance,
        status: RoutingInstanceStatus,
    ) -> Result<bool, Error> {
        if instance.status.as_ref() == Some(&status) {
            return Ok(true);
        }
        match self.store.update_status(instance, &status).await {
            Ok(_) => Ok(true),
            Err(error) if is_conflict(&error) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

fn observed_generation(instance: &RoutingInstance) -> Option<i64> {
    instance.status.as_ref().and_then(|s| s.observed_generation)
}

/// Makes the instance the controller of every namespaced routing object, so
/// that they are garbage collected with it and changes to them trigger a
/// reconcile.
fn set_owner(instance: &RoutingInstance, objects: &mut RoutingObjects) {
    let Some(owner) = instance.controller_owner_ref(&()) else {
        return;
    };
    let owners = Some(vec![owner]);
    let metas = objects
        .services
        .iter_mut()
        .map(|o| &mut o.metadata)
        .chain(objects.ingresses.iter_mut().map(|o| &mut o.metadata))
        .chain(objects.routes.iter_mut().map(|o| &mut o.metadata));
    for meta in metas {
        meta.owner_references = owners.clone();
    }
}

fn requeue(reason: &'static str) -> Reconciled {
    debug!(reason, "Requeueing");
    Ok((Outcome::Requeued, Action::requeue(SolverError::DEFAULT_RETRY)))
}
