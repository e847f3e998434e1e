use crate::{
    builder::{self, EndpointRouter},
    proxy::{self, ProxiedEndpoint},
    Endpoints, ProxyConfig, RoutingConfig, RoutingMeta, RoutingObjects, SolverError,
};
use workspace_routing_core::naming;
use workspace_routing_k8s_api::{
    labels,
    openshift::{InsecureEdgeTerminationPolicy, TlsConfig, TlsTermination},
    EndpointSpec, OAuthClient, Route,
};

/// Places an OpenShift OAuth proxy in front of every public, secure endpoint.
///
/// Other endpoints are exposed as the basic solver exposes them. The proxies
/// authenticate against a cluster-scoped `OAuthClient` registered for the
/// workspace.
#[derive(Clone, Debug, PartialEq)]
pub struct OAuthSolver {
    router: EndpointRouter,
    proxy: ProxyConfig,
}

impl OAuthSolver {
    const GRANT_METHOD: &'static str = "prompt";

    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            router: EndpointRouter {
                platform: config.platform,
                ingress_annotations: config.ingress_annotations.clone(),
                route_annotations: config.route_annotations.clone(),
            },
            proxy: config.proxy.clone(),
        }
    }

    pub fn spec_objects(
        &self,
        endpoints: &Endpoints,
        meta: &RoutingMeta,
    ) -> Result<RoutingObjects, SolverError> {
        meta.require_suffix(endpoints.values().flatten())?;

        let (proxy, direct): (Vec<&EndpointSpec>, Vec<&EndpointSpec>) = endpoints
            .values()
            .flatten()
            .partition(|ep| proxy::needs_proxy(ep));
        let proxied = proxy::allocate(proxy);

        // Proxied endpoints are reachable only through their proxy's port.
        let exposed = proxied
            .iter()
            .map(|p| &p.public)
            .chain(direct.iter().copied())
            .collect::<Vec<_>>();

        let mut objects = RoutingObjects::default();
        if let Some(mut service) = builder::shared_service(exposed.iter().copied(), meta) {
            service
                .metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(
                    labels::SERVING_CERT_SECRET.to_string(),
                    naming::proxy_tls_secret_name(&meta.workspace_id),
                );
            objects.services.push(service);
        }
        objects
            .services
            .extend(builder::discoverable_services(exposed.iter().copied(), meta));

        objects
            .routes
            .extend(proxied.iter().map(|p| self.proxy_route(p, meta)));
        self.router.expose(direct, meta, &mut objects);

        if !proxied.is_empty() {
            let client_secret = meta
                .uid
                .as_deref()
                .ok_or_else(|| SolverError::invalid("routing instance has no uid"))?;
            objects.pod_additions = Some(proxy::pod_additions(
                &proxied,
                meta,
                &self.proxy,
                client_secret,
            ));
            objects.oauth_client = Some(Self::oauth_client(
                &objects.routes[..proxied.len()],
                meta,
                client_secret,
            ));
        }

        Ok(objects)
    }

    /// Builds a reencrypting Route to the proxy of an endpoint.
    ///
    /// The Route is named and hosted after the proxy (`<endpoint>-proxy` on
    /// its TLS port) but annotated with the upstream endpoint's name, which
    /// resolves the upstream's URL through it.
    fn proxy_route(&self, proxied: &ProxiedEndpoint<'_>, meta: &RoutingMeta) -> Route {
        let upstream = proxied.upstream;
        let mut route = self.router.route(&proxied.public, meta);
        route.spec.path = Some("/".to_string());
        route.spec.tls = Some(TlsConfig {
            termination: TlsTermination::Reencrypt,
            insecure_edge_termination_policy: Some(InsecureEdgeTerminationPolicy::Redirect),
        });
        route
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(labels::ENDPOINT_NAME.to_string(), upstream.name.clone());
        route
    }

    fn oauth_client(proxy_routes: &[Route], meta: &RoutingMeta, secret: &str) -> OAuthClient {
        let mut client = OAuthClient::new(naming::oauth_client_name(&meta.workspace_id));
        client.metadata.labels = Some(labels::workspace_labels(&meta.workspace_id));
        if let Some(restricted) = meta.restricted_access.as_ref() {
            client.metadata.annotations = Some(
                Some((labels::RESTRICTED_ACCESS.to_string(), restricted.clone()))
                    .into_iter()
                    .collect(),
            );
        }
        client.secret = Some(secret.to_string());
        client.grant_method = Some(Self::GRANT_METHOD.to_string());
        client.redirect_uris = proxy_routes
            .iter()
            .filter_map(|route| route.spec.host.as_deref())
            .map(|host| format!("https://{}/oauth/callback", host))
            .collect();
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tests::{endpoint, meta},
        Platform,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use workspace_routing_k8s_api::Exposure;

    fn solver() -> OAuthSolver {
        OAuthSolver::new(&RoutingConfig {
            platform: Platform::OpenShift,
            ..Default::default()
        })
    }

    #[test]
    fn unproxied_endpoints_need_no_oauth_client() {
        let endpoints = btreemap! {
            "component".to_string() => vec![endpoint("web", 8080, Exposure::Public)],
        };
        let objects = solver().spec_objects(&endpoints, &meta()).unwrap();
        assert_eq!(objects.oauth_client, None);
        assert_eq!(objects.pod_additions, None);
        assert_eq!(objects.routes.len(), 1);
        assert_eq!(
            objects.routes[0].spec.tls.as_ref().map(|t| t.termination),
            Some(TlsTermination::Edge)
        );
    }

    #[test]
    fn proxy_replaces_upstream_port_on_shared_service() {
        let mut ide = endpoint("ide", 3100, Exposure::Public);
        ide.secure = true;
        let endpoints = btreemap! {
            "component".to_string() => vec![ide, endpoint("debug", 5005, Exposure::Internal)],
        };
        let objects = solver().spec_objects(&endpoints, &meta()).unwrap();

        let [service] = &objects.services[..] else {
            panic!("expected one service: {:?}", objects.services);
        };
        let ports = service.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(
            ports.iter().map(|p| p.port).collect::<Vec<_>>(),
            vec![4400, 5005]
        );
        assert_eq!(
            service.metadata.annotations.as_ref().unwrap()[labels::SERVING_CERT_SECRET],
            "workspaceb978dc9bd4ba428b-proxy-tls"
        );
    }

    #[test]
    fn missing_uid_is_invalid() {
        let mut ide = endpoint("ide", 3100, Exposure::Public);
        ide.secure = true;
        let endpoints = btreemap! { "component".to_string() => vec![ide] };
        let mut meta = meta();
        meta.uid = None;
        assert!(matches!(
            solver().spec_objects(&endpoints, &meta),
            Err(SolverError::Invalid { .. })
        ));
    }
}
