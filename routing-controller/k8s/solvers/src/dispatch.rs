use crate::{BasicSolver, ClusterSolver, OAuthSolver, RoutingConfig, Solver, SolverError};

pub const BASIC_ROUTING_CLASS: &str = "basic";
pub const OPENSHIFT_OAUTH_ROUTING_CLASS: &str = "openshift-oauth";
pub const CLUSTER_ROUTING_CLASS: &str = "cluster";
pub const CLUSTER_TLS_ROUTING_CLASS: &str = "cluster-tls";
pub const WEB_TERMINAL_ROUTING_CLASS: &str = "web-terminal";

/// Selects the solver for a routing class.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    config: RoutingConfig,
}

// === impl Dispatcher ===

impl Dispatcher {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Selects the solver for `routing_class`.
    ///
    /// Classes managed by other controllers are reported as `NotSupported`.
    pub fn solver(&self, routing_class: &str) -> Result<Solver, SolverError> {
        match self.effective_class(routing_class) {
            "" => Err(SolverError::invalid(
                "routing requires field routingClass to be set",
            )),
            BASIC_ROUTING_CLASS => Ok(Solver::Basic(BasicSolver::new(&self.config))),
            class @ (OPENSHIFT_OAUTH_ROUTING_CLASS
            | CLUSTER_TLS_ROUTING_CLASS
            | WEB_TERMINAL_ROUTING_CLASS)
                if !self.config.platform.is_openshift() =>
            {
                Err(SolverError::PlatformUnsupported {
                    class: class.to_string(),
                })
            }
            OPENSHIFT_OAUTH_ROUTING_CLASS => {
                Ok(Solver::OpenShiftOAuth(OAuthSolver::new(&self.config)))
            }
            CLUSTER_ROUTING_CLASS => Ok(Solver::Cluster(ClusterSolver::new(false))),
            CLUSTER_TLS_ROUTING_CLASS | WEB_TERMINAL_ROUTING_CLASS => {
                Ok(Solver::Cluster(ClusterSolver::new(true)))
            }
            class => Err(SolverError::NotSupported {
                class: class.to_string(),
            }),
        }
    }

    fn effective_class<'c>(&'c self, routing_class: &'c str) -> &'c str {
        if routing_class.is_empty() {
            self.config.default_routing_class.as_deref().unwrap_or_default()
        } else {
            routing_class
        }
    }
}
