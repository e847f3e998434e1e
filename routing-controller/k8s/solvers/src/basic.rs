use crate::{
    builder::{self, EndpointRouter},
    Endpoints, RoutingConfig, RoutingMeta, RoutingObjects, SolverError,
};

/// Exposes endpoints without authentication.
///
/// Public endpoints get Ingresses without TLS on Kubernetes, and Routes with
/// edge TLS on OpenShift.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicSolver {
    router: EndpointRouter,
}

impl BasicSolver {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            router: EndpointRouter {
                platform: config.platform,
                ingress_annotations: config.ingress_annotations.clone(),
                route_annotations: config.route_annotations.clone(),
            },
        }
    }

    pub fn spec_objects(
        &self,
        endpoints: &Endpoints,
        meta: &RoutingMeta,
    ) -> Result<RoutingObjects, SolverError> {
        let all = endpoints.values().flatten();
        meta.require_suffix(all.clone())?;

        let mut objects = RoutingObjects::default();
        objects
            .services
            .extend(builder::shared_service(all.clone(), meta));
        objects
            .services
            .extend(builder::discoverable_services(all.clone(), meta));
        self.router.expose(all, meta, &mut objects);
        Ok(objects)
    }
}
