use crate::{builder, Endpoints, RoutingMeta, RoutingObjects, SolverError};
use std::collections::BTreeMap;
use workspace_routing_core::{resolve_url, UrlEndpoint};
use workspace_routing_k8s_api::{
    labels, EndpointSpec, ExposedEndpoint, Exposure, ResourceExt,
};

/// Resolved endpoints, keyed by component name.
pub type ExposedEndpoints = BTreeMap<String, Vec<ExposedEndpoint>>;

pub(crate) fn resolve(
    endpoints: &Endpoints,
    meta: &RoutingMeta,
    cluster: &RoutingObjects,
) -> Result<(ExposedEndpoints, bool), SolverError> {
    let mut exposed = ExposedEndpoints::new();
    let mut ready = true;

    for (component, component_endpoints) in endpoints {
        for endpoint in component_endpoints {
            let url = match endpoint.exposure {
                Exposure::None => continue,
                Exposure::Internal => Some(internal_url(endpoint, meta)),
                Exposure::Public => public_url(endpoint, cluster)?,
            };

            match url {
                Some(url) => exposed
                    .entry(component.clone())
                    .or_default()
                    .push(ExposedEndpoint {
                        name: endpoint.name.clone(),
                        url,
                        attributes: endpoint.attributes.clone(),
                    }),
                None => {
                    tracing::debug!(endpoint = %endpoint.name, "Endpoint has no host yet");
                    ready = false;
                }
            }
        }
    }

    Ok((exposed, ready))
}

/// Resolves every exposed endpoint to the address of the Service carrying its
/// port. Endpoints are secure when the Service has a serving certificate.
pub(crate) fn resolve_in_cluster(
    endpoints: &Endpoints,
    meta: &RoutingMeta,
    cluster: &RoutingObjects,
) -> Result<(ExposedEndpoints, bool), SolverError> {
    let mut exposed = ExposedEndpoints::new();
    for (component, component_endpoints) in endpoints {
        for endpoint in component_endpoints {
            if endpoint.exposure == Exposure::None {
                continue;
            }
            let url = service_url(endpoint, meta, cluster)?;
            exposed
                .entry(component.clone())
                .or_default()
                .push(ExposedEndpoint {
                    name: endpoint.name.clone(),
                    url,
                    attributes: endpoint.attributes.clone(),
                });
        }
    }
    Ok((exposed, true))
}

fn service_url(
    endpoint: &EndpointSpec,
    meta: &RoutingMeta,
    cluster: &RoutingObjects,
) -> Result<String, SolverError> {
    let name = builder::backend_service_name(endpoint, meta);
    let service = cluster
        .services
        .iter()
        .find(|svc| svc.name_any() == name)
        .filter(|svc| {
            svc.spec
                .as_ref()
                .and_then(|spec| spec.ports.as_deref())
                .unwrap_or_default()
                .iter()
                .any(|p| p.port == endpoint.target_port)
        })
        .ok_or_else(|| SolverError::EndpointUnresolvable {
            endpoint: endpoint.name.clone(),
            reason: format!("service {} does not expose port {}", name, endpoint.target_port),
        })?;

    let tls = service.annotations().contains_key(labels::SERVING_CERT_SECRET);
    let host = format!(
        "{}.{}.svc:{}",
        name,
        service.namespace().unwrap_or_else(|| meta.namespace.clone()),
        endpoint.target_port
    );
    let url_endpoint = UrlEndpoint {
        secure: tls,
        ..url_endpoint(endpoint)
    };
    Ok(resolve_url(url_endpoint, &host, "", tls))
}

/// Resolves a public endpoint through the Route or Ingress labeled with its
/// name. Returns `None` while the exposing object has no host.
fn public_url(
    endpoint: &EndpointSpec,
    cluster: &RoutingObjects,
) -> Result<Option<String>, SolverError> {
    let exposes = |annotations: &BTreeMap<String, String>| {
        annotations.get(labels::ENDPOINT_NAME) == Some(&endpoint.name)
    };

    if let Some(route) = cluster.routes.iter().find(|r| exposes(r.annotations())) {
        let url = route.assigned_host().map(|host| {
            resolve_url(
                url_endpoint(endpoint),
                host,
                route.spec.path.as_deref().unwrap_or_default(),
                route.spec.tls.is_some(),
            )
        });
        return Ok(url);
    }

    if let Some(ingress) = cluster.ingresses.iter().find(|i| exposes(i.annotations())) {
        let rules = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.rules.as_deref())
            .unwrap_or_default();
        let [rule] = rules else {
            return Err(SolverError::EndpointUnresolvable {
                endpoint: endpoint.name.clone(),
                reason: format!("ingress {} must contain exactly one rule", ingress.name_any()),
            });
        };
        // Ingresses are not TLS-terminated by this controller.
        let url = rule
            .host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| resolve_url(url_endpoint(endpoint), host, "", false));
        return Ok(url);
    }

    Err(SolverError::EndpointUnresolvable {
        endpoint: endpoint.name.clone(),
        reason: "no ingress or route exposes it".to_string(),
    })
}

/// Resolves an internal endpoint to its in-cluster Service address.
fn internal_url(endpoint: &EndpointSpec, meta: &RoutingMeta) -> String {
    let host = format!(
        "{}.{}.svc:{}",
        builder::backend_service_name(endpoint, meta),
        meta.namespace,
        endpoint.target_port
    );
    resolve_url(url_endpoint(endpoint), &host, "", false)
}

fn url_endpoint(endpoint: &EndpointSpec) -> UrlEndpoint<'_> {
    UrlEndpoint {
        protocol: endpoint.protocol(),
        secure: endpoint.secure,
        path: endpoint.path(),
    }
}
