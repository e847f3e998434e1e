//! Workspace routing solvers
//!
//! A solver compiles a workspace's abstract endpoints into the cluster objects that expose them,
//! and later resolves each endpoint's URL from the copies of those objects that are live on the
//! cluster. The routing class of a `DevWorkspaceRouting` selects its solver:
//!
//! - `basic` exposes public endpoints directly, through Ingresses on Kubernetes and edge-terminated
//!   Routes on OpenShift.
//! - `openshift-oauth` places an authenticating proxy sidecar in front of every public, secure
//!   endpoint and registers a cluster-scoped OAuth client for the workspace.
//! - `cluster` exposes endpoints at their in-cluster Service addresses only. `cluster-tls` and
//!   `web-terminal` do the same over TLS, with serving certificates issued by OpenShift.
//!
//! ```text
//! [ Endpoints ] -> [ Dispatcher ] -> [ Solver ] -> [ RoutingObjects ] -> (cluster) -> [ ExposedEndpoints ]
//! ```
//!
//! Solvers are pure: they never talk to the cluster. The routing controller syncs the objects they
//! produce.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod basic;
mod builder;
mod cluster;
mod config;
mod dispatch;
mod endpoints;
mod error;
mod oauth;
mod proxy;

#[cfg(test)]
mod tests;

pub use self::{
    basic::BasicSolver,
    cluster::ClusterSolver,
    config::{Platform, ProxyConfig, RoutingConfig},
    dispatch::{
        Dispatcher, BASIC_ROUTING_CLASS, CLUSTER_ROUTING_CLASS, CLUSTER_TLS_ROUTING_CLASS,
        OPENSHIFT_OAUTH_ROUTING_CLASS, WEB_TERMINAL_ROUTING_CLASS,
    },
    endpoints::ExposedEndpoints,
    error::SolverError,
    oauth::OAuthSolver,
};
use std::collections::BTreeMap;
use workspace_routing_k8s_api::{
    labels::Map, EndpointSpec, Ingress, OAuthClient, PodAdditions, ResourceExt, Route,
    RoutingInstance, Service,
};

/// Endpoints, keyed by the name of the component declaring them.
pub type Endpoints = BTreeMap<String, Vec<EndpointSpec>>;

/// The objects a solver wants on the cluster. Recomputed on every reconcile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutingObjects {
    pub services: Vec<Service>,
    pub ingresses: Vec<Ingress>,
    pub routes: Vec<Route>,
    pub pod_additions: Option<PodAdditions>,

    /// The workspace's OAuth client. Solvers that register clients leave this
    /// empty to have stale registrations removed.
    pub oauth_client: Option<OAuthClient>,
}

/// Workspace metadata shared by every generated object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutingMeta {
    pub workspace_id: String,
    pub workspace_name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub routing_suffix: String,
    pub pod_selector: Map,
    pub restricted_access: Option<String>,
    pub service_annotations: Map,
}

/// The routing strategies supported by this controller.
#[derive(Clone, Debug, PartialEq)]
pub enum Solver {
    Basic(BasicSolver),
    OpenShiftOAuth(OAuthSolver),
    Cluster(ClusterSolver),
}

// === impl RoutingMeta ===

impl RoutingMeta {
    pub fn new(instance: &RoutingInstance, config: &RoutingConfig) -> Result<Self, SolverError> {
        let namespace = instance
            .namespace()
            .ok_or_else(|| SolverError::invalid("routing instance has no namespace"))?;
        let spec = &instance.spec;

        let routing_suffix = if spec.routing_suffix.is_empty() {
            config.cluster_host_suffix.clone().unwrap_or_default()
        } else {
            spec.routing_suffix.clone()
        };

        let service_annotations = spec
            .service
            .iter()
            .flat_map(|components| components.values())
            .flat_map(|svc| svc.annotations.clone())
            .collect();

        Ok(Self {
            workspace_id: spec.workspace_id.clone(),
            workspace_name: instance.workspace_name(),
            namespace,
            uid: instance.uid(),
            routing_suffix,
            pod_selector: spec.pod_selector.clone(),
            restricted_access: instance.restricted_access().map(Into::into),
            service_annotations,
        })
    }

    /// Fails when hostnames are needed but no routing suffix is known.
    pub(crate) fn require_suffix<'e>(
        &self,
        endpoints: impl IntoIterator<Item = &'e EndpointSpec>,
    ) -> Result<(), SolverError> {
        let public = endpoints
            .into_iter()
            .any(|ep| ep.exposure == workspace_routing_k8s_api::Exposure::Public);
        if public && self.routing_suffix.is_empty() {
            return Err(SolverError::invalid(
                "routing requires spec.routingSuffix or a configured cluster host suffix",
            ));
        }
        Ok(())
    }
}

// === impl Solver ===

impl Solver {
    /// Whether the solver leaves cluster-scoped objects behind that must be
    /// removed before the routing instance is deleted.
    pub fn finalizer_required(&self) -> bool {
        matches!(self, Self::OpenShiftOAuth(_))
    }

    /// Computes the objects that expose `endpoints`.
    pub fn spec_objects(
        &self,
        endpoints: &Endpoints,
        meta: &RoutingMeta,
    ) -> Result<RoutingObjects, SolverError> {
        match self {
            Self::Basic(solver) => solver.spec_objects(endpoints, meta),
            Self::OpenShiftOAuth(solver) => solver.spec_objects(endpoints, meta),
            Self::Cluster(solver) => solver.spec_objects(endpoints, meta),
        }
    }

    /// Resolves the URL of each exposed endpoint from the cluster's copies of
    /// the routing objects.
    ///
    /// Returns `false` alongside the resolved endpoints if some endpoint does
    /// not have a host yet.
    pub fn exposed_endpoints(
        &self,
        endpoints: &Endpoints,
        meta: &RoutingMeta,
        cluster: &RoutingObjects,
    ) -> Result<(ExposedEndpoints, bool), SolverError> {
        match self {
            // Both label their Ingresses and Routes the same way.
            Self::Basic(_) | Self::OpenShiftOAuth(_) => endpoints::resolve(endpoints, meta, cluster),
            Self::Cluster(_) => endpoints::resolve_in_cluster(endpoints, meta, cluster),
        }
    }
}
