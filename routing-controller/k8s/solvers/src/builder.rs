//! Builds the Services, Ingresses and Routes shared by every solver.

use crate::{config::Platform, RoutingMeta, RoutingObjects};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use workspace_routing_core::naming;
use workspace_routing_k8s_api::{
    labels::{self, Map},
    openshift::{
        InsecureEdgeTerminationPolicy, RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
        TlsTermination,
    },
    EndpointSpec, Exposure, Ingress, IntOrString, ObjectMeta, Route, Service, ServicePort,
    ServiceSpec,
};

pub(crate) const ROUTE_DEFAULT_ANNOTATIONS: &[(&str, &str)] =
    &[("haproxy.router.openshift.io/rewrite-target", "/")];

const INGRESS_DEFAULT_ANNOTATIONS: &[(&str, &str)] = &[
    ("kubernetes.io/ingress.class", "nginx"),
    ("nginx.ingress.kubernetes.io/rewrite-target", "/"),
    ("nginx.ingress.kubernetes.io/ssl-redirect", "false"),
];

/// Exposes public endpoints as Ingresses or Routes, depending on the platform.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct EndpointRouter {
    pub platform: Platform,
    pub ingress_annotations: Option<Map>,
    pub route_annotations: Option<Map>,
}

// === impl EndpointRouter ===

impl EndpointRouter {
    /// Adds an Ingress or Route for every public endpoint.
    pub fn expose<'e>(
        &self,
        endpoints: impl IntoIterator<Item = &'e EndpointSpec>,
        meta: &RoutingMeta,
        objects: &mut RoutingObjects,
    ) {
        for endpoint in endpoints {
            if endpoint.exposure != Exposure::Public {
                continue;
            }
            match self.platform {
                Platform::OpenShift => objects.routes.push(self.route(endpoint, meta)),
                Platform::Kubernetes => objects.ingresses.push(self.ingress(endpoint, meta)),
            }
        }
    }

    /// Builds an edge-terminated Route for the endpoint.
    pub fn route(&self, endpoint: &EndpointSpec, meta: &RoutingMeta) -> Route {
        let name = naming::endpoint_name(&endpoint.name);
        let annotations = routing_annotations(
            endpoint,
            self.route_annotations.as_ref(),
            ROUTE_DEFAULT_ANNOTATIONS,
        );
        let mut route = Route::new(
            &naming::route_name(&meta.workspace_id, &name),
            RouteSpec {
                host: Some(naming::endpoint_hostname(
                    &meta.workspace_id,
                    &name,
                    endpoint.target_port,
                    &meta.routing_suffix,
                )),
                path: None,
                to: RouteTargetReference {
                    kind: "Service".to_string(),
                    name: backend_service_name(endpoint, meta),
                    weight: None,
                },
                port: Some(RoutePort {
                    target_port: IntOrString::Int(endpoint.target_port),
                }),
                tls: Some(TlsConfig {
                    termination: TlsTermination::Edge,
                    insecure_edge_termination_policy: Some(InsecureEdgeTerminationPolicy::Redirect),
                }),
            },
        );
        route.metadata = meta.object_meta(route.metadata.name.take(), annotations);
        route
    }

    /// Builds a TLS-less Ingress for the endpoint.
    pub fn ingress(&self, endpoint: &EndpointSpec, meta: &RoutingMeta) -> Ingress {
        let name = naming::endpoint_name(&endpoint.name);
        let annotations = routing_annotations(
            endpoint,
            self.ingress_annotations.as_ref(),
            INGRESS_DEFAULT_ANNOTATIONS,
        );
        let host = naming::endpoint_hostname(
            &meta.workspace_id,
            &name,
            endpoint.target_port,
            &meta.routing_suffix,
        );
        Ingress {
            metadata: meta
                .object_meta(Some(naming::route_name(&meta.workspace_id, &name)), annotations),
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "ImplementationSpecific".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: backend_service_name(endpoint, meta),
                                    port: Some(ServiceBackendPort {
                                        number: Some(endpoint.target_port),
                                        name: None,
                                    }),
                                }),
                                resource: None,
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// Builds the Service shared by a workspace's exposed endpoints.
///
/// Discoverable endpoints are served by their own Service instead. A port
/// shared by several endpoints is exposed once. Returns `None` when no
/// endpoint needs the shared Service.
pub(crate) fn shared_service<'e>(
    endpoints: impl IntoIterator<Item = &'e EndpointSpec>,
    meta: &RoutingMeta,
) -> Option<Service> {
    let mut ports = Vec::<ServicePort>::new();
    for endpoint in endpoints {
        if endpoint.exposure == Exposure::None || endpoint.is_discoverable() {
            continue;
        }
        if ports.iter().any(|p| p.port == endpoint.target_port) {
            continue;
        }
        ports.push(service_port(endpoint));
    }
    if ports.is_empty() {
        return None;
    }

    Some(Service {
        metadata: meta.object_meta(
            Some(naming::service_name(&meta.workspace_id)),
            meta.service_annotations.clone(),
        ),
        spec: Some(service_spec(ports, meta)),
        status: None,
    })
}

/// Builds one Service per discoverable endpoint, named after the endpoint so
/// that other workloads in the namespace can address it.
pub(crate) fn discoverable_services<'e>(
    endpoints: impl IntoIterator<Item = &'e EndpointSpec>,
    meta: &RoutingMeta,
) -> Vec<Service> {
    endpoints
        .into_iter()
        .filter(|ep| ep.exposure != Exposure::None && ep.is_discoverable())
        .map(|endpoint| {
            let annotations = Some((labels::DISCOVERABLE_SERVICE.to_string(), "true".to_string()))
                .into_iter()
                .collect();
            let mut metadata =
                meta.object_meta(Some(naming::endpoint_name(&endpoint.name)), annotations);
            metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(labels::WORKSPACE_NAME.to_string(), meta.workspace_name.clone());
            Service {
                metadata,
                spec: Some(service_spec(vec![service_port(endpoint)], meta)),
                status: None,
            }
        })
        .collect()
}

/// The name of the Service that carries the endpoint's port.
pub(crate) fn backend_service_name(endpoint: &EndpointSpec, meta: &RoutingMeta) -> String {
    if endpoint.is_discoverable() {
        naming::endpoint_name(&endpoint.name)
    } else {
        naming::service_name(&meta.workspace_id)
    }
}

/// Computes the annotations of an endpoint's Ingress or Route.
///
/// The endpoint's own annotations take precedence over the configured ones,
/// which take precedence over the platform defaults. Whichever set applies
/// replaces the others entirely, even when it is empty.
pub(crate) fn routing_annotations(
    endpoint: &EndpointSpec,
    configured: Option<&Map>,
    defaults: &[(&str, &str)],
) -> Map {
    let mut annotations = match endpoint.annotations.as_ref().or(configured) {
        Some(annotations) => annotations.clone(),
        None => defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };
    annotations.insert(labels::ENDPOINT_NAME.to_string(), endpoint.name.clone());
    annotations
}

fn service_port(endpoint: &EndpointSpec) -> ServicePort {
    ServicePort {
        name: Some(naming::endpoint_name(&endpoint.name)),
        protocol: Some("TCP".to_string()),
        port: endpoint.target_port,
        target_port: Some(IntOrString::Int(endpoint.target_port)),
        ..Default::default()
    }
}

fn service_spec(ports: Vec<ServicePort>, meta: &RoutingMeta) -> ServiceSpec {
    ServiceSpec {
        ports: Some(ports),
        selector: Some(meta.pod_selector.clone()),
        type_: Some("ClusterIP".to_string()),
        ..Default::default()
    }
}

impl RoutingMeta {
    pub(crate) fn object_meta(&self, name: Option<String>, mut annotations: Map) -> ObjectMeta {
        if let Some(restricted) = self.restricted_access.as_ref() {
            annotations.insert(labels::RESTRICTED_ACCESS.to_string(), restricted.clone());
        }
        ObjectMeta {
            name,
            namespace: Some(self.namespace.clone()),
            labels: Some(labels::workspace_labels(&self.workspace_id)),
            annotations: Some(annotations).filter(|a| !a.is_empty()),
            ..Default::default()
        }
    }
}
