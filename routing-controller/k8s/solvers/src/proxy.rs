//! Assembles the authenticating proxy sidecars placed in front of secure
//! public endpoints.

use crate::{ProxyConfig, RoutingMeta};
use k8s_openapi::api::core::v1::ContainerPort;
use workspace_routing_core::naming;
use workspace_routing_k8s_api::{
    Container, EndpointSpec, Exposure, PodAdditions, SecretVolumeSource, Volume, VolumeMount,
};

/// The first port proxies listen on for TLS traffic.
const HTTPS_PORT_BASE: i32 = 4400;

/// The first loopback port proxies listen on for plaintext traffic.
const HTTP_PORT_BASE: i32 = 4180;

const TLS_MOUNT_PATH: &str = "/etc/tls/private";

/// An endpoint served through a proxy.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ProxiedEndpoint<'e> {
    /// The endpoint the proxy forwards to.
    pub upstream: &'e EndpointSpec,

    /// The endpoint the proxy exposes in place of the upstream.
    pub public: EndpointSpec,

    pub http_port: i32,
}

/// Whether an endpoint should be served through a proxy.
pub(crate) fn needs_proxy(endpoint: &EndpointSpec) -> bool {
    // Terminals cannot authenticate against the OpenShift OAuth server.
    endpoint.exposure == Exposure::Public
        && endpoint.secure
        && endpoint.endpoint_type() != Some("terminal")
}

/// Allocates proxy ports for `endpoints` in iteration order.
pub(crate) fn allocate<'e>(
    endpoints: impl IntoIterator<Item = &'e EndpointSpec>,
) -> Vec<ProxiedEndpoint<'e>> {
    endpoints
        .into_iter()
        .zip(0..)
        .map(|(upstream, i)| ProxiedEndpoint {
            public: EndpointSpec {
                name: format!("{}-proxy", upstream.name),
                target_port: HTTPS_PORT_BASE + i,
                exposure: upstream.exposure,
                secure: upstream.secure,
                attributes: upstream.attributes.clone(),
                annotations: upstream.annotations.clone(),
                protocol: None,
                path: None,
            },
            http_port: HTTP_PORT_BASE + i,
            upstream,
        })
        .collect()
}

/// Builds one sidecar per proxied endpoint, sharing the serving certificate
/// volume.
pub(crate) fn pod_additions(
    proxied: &[ProxiedEndpoint<'_>],
    meta: &RoutingMeta,
    config: &ProxyConfig,
    client_secret: &str,
) -> PodAdditions {
    let secret_name = naming::proxy_tls_secret_name(&meta.workspace_id);
    let volume = Volume {
        name: secret_name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            default_mode: Some(0o644),
            ..Default::default()
        }),
        ..Default::default()
    };

    let containers = proxied
        .iter()
        .map(|p| container(p, &volume.name, meta, config, client_secret))
        .collect();

    PodAdditions {
        containers,
        volumes: vec![volume],
        ..Default::default()
    }
}

fn container(
    proxied: &ProxiedEndpoint<'_>,
    volume: &str,
    meta: &RoutingMeta,
    config: &ProxyConfig,
    client_secret: &str,
) -> Container {
    let upstream_port = proxied.upstream.target_port;
    let https_port = proxied.public.target_port;
    let cookie_secret = client_secret.replace('-', "");

    Container {
        name: naming::proxy_container_name(upstream_port, https_port),
        image: Some(config.image.clone()),
        image_pull_policy: config.pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            container_port: https_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: volume.to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        args: Some(vec![
            format!("--https-address=:{}", https_port),
            format!("--http-address=127.0.0.1:{}", proxied.http_port),
            "--provider=openshift".to_string(),
            format!("--upstream=http://localhost:{}", upstream_port),
            format!("--tls-cert={}/tls.crt", TLS_MOUNT_PATH),
            format!("--tls-key={}/tls.key", TLS_MOUNT_PATH),
            format!("--cookie-secret={}", cookie_secret),
            format!(
                "--client-id={}",
                naming::oauth_client_name(&meta.workspace_id)
            ),
            format!("--client-secret={}", client_secret),
            "--pass-user-bearer-token=false".to_string(),
            "--pass-access-token=true".to_string(),
            "--scope=user:full".to_string(),
        ]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{endpoint, meta};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    #[test]
    fn proxies_secure_public_non_terminal_endpoints() {
        let mut secure = endpoint("ide", 3100, Exposure::Public);
        secure.secure = true;
        assert!(needs_proxy(&secure));

        let mut terminal = secure.clone();
        terminal.attributes = btreemap! {
            "type".to_string() => serde_json::Value::String("terminal".to_string()),
        };
        assert!(!needs_proxy(&terminal));

        let mut internal = secure.clone();
        internal.exposure = Exposure::Internal;
        assert!(!needs_proxy(&internal));

        assert!(!needs_proxy(&endpoint("insecure", 8080, Exposure::Public)));
    }

    #[test]
    fn allocates_ports_in_order() {
        let endpoints = vec![
            endpoint("first", 3100, Exposure::Public),
            endpoint("second", 3200, Exposure::Public),
        ];
        let proxied = allocate(&endpoints);
        let ports = proxied
            .iter()
            .map(|p| (p.public.name.as_str(), p.public.target_port, p.http_port))
            .collect::<Vec<_>>();
        assert_eq!(
            ports,
            vec![("first-proxy", 4400, 4180), ("second-proxy", 4401, 4181)]
        );
    }

    #[test]
    fn sidecar_shape() {
        let endpoints = vec![endpoint("ide", 3100, Exposure::Public)];
        let proxied = allocate(&endpoints);
        let additions = pod_additions(
            &proxied,
            &meta(),
            &ProxyConfig::default(),
            "2c7d4e0a-9b1f-4c3e-8a6d-5f4b3a2c1d0e",
        );

        assert_eq!(additions.volumes.len(), 1);
        assert_eq!(
            additions.volumes[0].name,
            "workspaceb978dc9bd4ba428b-proxy-tls"
        );

        let [container] = &additions.containers[..] else {
            panic!("expected one container: {:?}", additions.containers);
        };
        assert_eq!(container.name, "oauth-proxy-3100-4400");
        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"--https-address=:4400".to_string()));
        assert!(args.contains(&"--http-address=127.0.0.1:4180".to_string()));
        assert!(args.contains(&"--upstream=http://localhost:3100".to_string()));
        assert!(args.contains(&"--client-id=workspaceb978dc9bd4ba428b-oauth-client".to_string()));
        assert!(args.contains(&"--cookie-secret=2c7d4e0a9b1f4c3e8a6d5f4b3a2c1d0e".to_string()));
    }
}
