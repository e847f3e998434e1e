use super::*;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use workspace_routing_k8s_api::{
    labels,
    openshift::{InsecureEdgeTerminationPolicy, TlsTermination},
    routing::ServiceOverride,
    Exposure, RoutingInstanceSpec,
};

pub(crate) fn endpoint(name: &str, port: i32, exposure: Exposure) -> EndpointSpec {
    EndpointSpec {
        name: name.to_string(),
        target_port: port,
        exposure,
        ..Default::default()
    }
}

pub(crate) fn meta() -> RoutingMeta {
    RoutingMeta {
        workspace_id: "workspaceb978dc9bd4ba428b".to_string(),
        workspace_name: "test-workspace".to_string(),
        namespace: "test-namespace".to_string(),
        uid: Some("2c7d4e0a-9b1f-4c3e-8a6d-5f4b3a2c1d0e".to_string()),
        routing_suffix: "test.routing".to_string(),
        pod_selector: btreemap! { "app".to_string() => "ws".to_string() },
        ..Default::default()
    }
}

fn discoverable_endpoints() -> Endpoints {
    let mut discoverable = endpoint("discoverable-endpoint", 7979, Exposure::Public);
    discoverable.attributes = btreemap! {
        "discoverable".to_string() => serde_json::Value::Bool(true),
    };
    btreemap! {
        "test-component".to_string() => vec![
            endpoint("endpoint1", 8080, Exposure::Public),
            discoverable,
        ],
    }
}

fn service_ports(objects: &RoutingObjects) -> Vec<(String, Vec<i32>)> {
    objects
        .services
        .iter()
        .map(|svc| {
            let ports = svc
                .spec
                .as_ref()
                .and_then(|s| s.ports.as_ref())
                .map(|ports| ports.iter().map(|p| p.port).collect())
                .unwrap_or_default();
            (svc.name_any(), ports)
        })
        .collect()
}

fn solver(platform: Platform, class: &str) -> Solver {
    Dispatcher::new(RoutingConfig {
        platform,
        ..Default::default()
    })
    .solver(class)
    .expect("solver must be available")
}

#[test]
fn basic_kubernetes() {
    let objects = solver(Platform::Kubernetes, "basic")
        .spec_objects(&discoverable_endpoints(), &meta())
        .unwrap();

    assert_eq!(
        service_ports(&objects),
        vec![
            ("workspaceb978dc9bd4ba428b-service".to_string(), vec![8080]),
            ("discoverable-endpoint".to_string(), vec![7979]),
        ]
    );
    assert!(objects.routes.is_empty());

    let hosts = objects
        .ingresses
        .iter()
        .flat_map(|i| i.spec.as_ref().unwrap().rules.as_ref().unwrap())
        .map(|rule| rule.host.clone().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        hosts,
        vec![
            "workspaceb978dc9bd4ba428b-endpoint1-8080.test.routing".to_string(),
            "workspaceb978dc9bd4ba428b-discoverable-endpoint-7979.test.routing".to_string(),
        ]
    );
    assert_eq!(objects.pod_additions, None);
    assert_eq!(objects.oauth_client, None);
}

#[test]
fn basic_openshift() {
    let objects = solver(Platform::OpenShift, "basic")
        .spec_objects(&discoverable_endpoints(), &meta())
        .unwrap();

    assert_eq!(
        service_ports(&objects),
        vec![
            ("workspaceb978dc9bd4ba428b-service".to_string(), vec![8080]),
            ("discoverable-endpoint".to_string(), vec![7979]),
        ]
    );
    assert!(objects.ingresses.is_empty());
    assert_eq!(objects.routes.len(), 2);

    let route = &objects.routes[0];
    let tls = route.spec.tls.as_ref().unwrap();
    assert_eq!(tls.termination, TlsTermination::Edge);
    assert_eq!(
        tls.insecure_edge_termination_policy,
        Some(InsecureEdgeTerminationPolicy::Redirect)
    );
    assert_eq!(
        route.annotations()["haproxy.router.openshift.io/rewrite-target"],
        "/"
    );

    // The discoverable endpoint's Route targets its own Service.
    assert_eq!(objects.routes[1].spec.to.name, "discoverable-endpoint");
}

#[test]
fn unexposed_endpoints_are_not_routed() {
    let endpoints = btreemap! {
        "test-component".to_string() => vec![
            endpoint("endpoint1", 8080, Exposure::Public),
            endpoint("hidden", 9999, Exposure::None),
        ],
    };
    for platform in [Platform::Kubernetes, Platform::OpenShift] {
        let objects = solver(platform, "basic")
            .spec_objects(&endpoints, &meta())
            .unwrap();
        let exposed = objects
            .ingresses
            .iter()
            .map(|i| i.annotations())
            .chain(objects.routes.iter().map(|r| r.annotations()))
            .map(|a| a[labels::ENDPOINT_NAME].clone())
            .collect::<Vec<_>>();
        assert_eq!(exposed, vec!["endpoint1".to_string()]);
        assert_eq!(
            service_ports(&objects),
            vec![("workspaceb978dc9bd4ba428b-service".to_string(), vec![8080])]
        );
    }
}

#[test]
fn shared_ports_are_exposed_once() {
    let endpoints = btreemap! {
        "a".to_string() => vec![endpoint("endpoint1", 8080, Exposure::Public)],
        "b".to_string() => vec![
            endpoint("endpoint2", 8080, Exposure::Internal),
            endpoint("endpoint3", 3000, Exposure::Public),
        ],
    };
    let objects = solver(Platform::Kubernetes, "basic")
        .spec_objects(&endpoints, &meta())
        .unwrap();
    assert_eq!(
        service_ports(&objects),
        vec![(
            "workspaceb978dc9bd4ba428b-service".to_string(),
            vec![8080, 3000]
        )]
    );
}

#[test]
fn public_endpoints_require_suffix() {
    let mut meta = meta();
    meta.routing_suffix = String::new();
    let err = solver(Platform::Kubernetes, "basic")
        .spec_objects(&discoverable_endpoints(), &meta)
        .unwrap_err();
    assert!(err.is_terminal(), "{err}");

    let internal = btreemap! {
        "test-component".to_string() => vec![endpoint("endpoint1", 8080, Exposure::Internal)],
    };
    let objects = solver(Platform::Kubernetes, "basic")
        .spec_objects(&internal, &meta)
        .unwrap();
    assert_eq!(objects.services.len(), 1);
}

#[test]
fn openshift_oauth() {
    let mut ide = endpoint("ide", 3100, Exposure::Public);
    ide.secure = true;
    ide.protocol = Some("http".to_string());
    let endpoints = btreemap! { "theia".to_string() => vec![ide] };

    let solver = solver(Platform::OpenShift, "openshift-oauth");
    let objects = solver.spec_objects(&endpoints, &meta()).unwrap();

    let additions = objects.pod_additions.as_ref().expect("proxy sidecar");
    assert_eq!(additions.containers.len(), 1);
    let ports = additions.containers[0].ports.as_ref().unwrap();
    assert_eq!(ports[0].container_port, 4400);

    let [route] = &objects.routes[..] else {
        panic!("expected one route: {:?}", objects.routes);
    };
    let host = "workspaceb978dc9bd4ba428b-ide-proxy-4400.test.routing";
    assert_eq!(route.name_any(), "workspaceb978dc9bd4ba428b-ide-proxy");
    assert_eq!(route.spec.host.as_deref(), Some(host));
    assert_eq!(route.spec.path.as_deref(), Some("/"));
    assert_eq!(route.spec.to.name, "workspaceb978dc9bd4ba428b-service");
    let tls = route.spec.tls.as_ref().unwrap();
    assert_eq!(tls.termination, TlsTermination::Reencrypt);
    assert_eq!(
        tls.insecure_edge_termination_policy,
        Some(InsecureEdgeTerminationPolicy::Redirect)
    );
    assert_eq!(route.annotations()[labels::ENDPOINT_NAME], "ide");

    let client = objects.oauth_client.as_ref().expect("oauth client");
    assert_eq!(client.metadata.name.as_deref(), Some("workspaceb978dc9bd4ba428b-oauth-client"));
    assert_eq!(client.metadata.namespace, None);
    assert_eq!(
        client.redirect_uris,
        vec![format!("https://{}/oauth/callback", host)]
    );
    assert_eq!(client.grant_method.as_deref(), Some("prompt"));

    // The upstream endpoint resolves through its proxy's Route.
    let (exposed, ready) = solver
        .exposed_endpoints(&endpoints, &meta(), &objects)
        .unwrap();
    assert!(ready);
    assert_eq!(exposed["theia"][0].url, format!("https://{}/", host));
}

#[test]
fn routing_meta_from_instance() {
    let mut instance = RoutingInstance::new(
        "routing-test",
        RoutingInstanceSpec {
            workspace_id: "workspaceb978dc9bd4ba428b".to_string(),
            routing_class: "basic".to_string(),
            service: Some(btreemap! {
                "theia".to_string() => ServiceOverride {
                    annotations: btreemap! { "a".to_string() => "b".to_string() },
                },
            }),
            ..Default::default()
        },
    );
    instance.metadata.namespace = Some("test-namespace".to_string());
    instance.metadata.uid = Some("uid".to_string());
    instance.metadata.annotations = Some(btreemap! {
        labels::RESTRICTED_ACCESS.to_string() => "true".to_string(),
    });

    let config = RoutingConfig {
        cluster_host_suffix: Some("apps.example.com".to_string()),
        ..Default::default()
    };
    let meta = RoutingMeta::new(&instance, &config).unwrap();
    assert_eq!(
        meta,
        RoutingMeta {
            workspace_id: "workspaceb978dc9bd4ba428b".to_string(),
            workspace_name: "routing-test".to_string(),
            namespace: "test-namespace".to_string(),
            uid: Some("uid".to_string()),
            routing_suffix: "apps.example.com".to_string(),
            pod_selector: Default::default(),
            restricted_access: Some("true".to_string()),
            service_annotations: btreemap! { "a".to_string() => "b".to_string() },
        }
    );

    instance.metadata.namespace = None;
    assert!(RoutingMeta::new(&instance, &config).is_err());
}
