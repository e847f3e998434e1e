//! Names and hostnames of the objects generated for a workspace.

use once_cell::sync::Lazy;
use regex::Regex;

/// The maximum length of a DNS label.
const MAX_LABEL_LEN: usize = 63;

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-z0-9]+").expect("pattern must be valid"));

/// Converts an endpoint name into a string usable within a DNS label.
pub fn endpoint_name(name: &str) -> String {
    let name = name.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&name, "-")
        .trim_matches('-')
        .to_string()
}

/// The name of the Service shared by all of a workspace's endpoints.
pub fn service_name(workspace_id: &str) -> String {
    format!("{}-service", workspace_id)
}

/// The name of the Ingress or Route exposing an endpoint.
pub fn route_name(workspace_id: &str, endpoint_name: &str) -> String {
    format!("{}-{}", workspace_id, endpoint_name)
}

/// The external hostname of an endpoint: `<workspace>-<endpoint>-<port>.<suffix>`.
///
/// The leading label is truncated to 63 bytes, never splitting a character.
pub fn endpoint_hostname(workspace_id: &str, endpoint_name: &str, port: i32, suffix: &str) -> String {
    let mut label = format!("{}-{}-{}", workspace_id, endpoint_name, port);
    if label.len() > MAX_LABEL_LEN {
        let end = (0..=MAX_LABEL_LEN)
            .rev()
            .find(|&i| label.is_char_boundary(i))
            .unwrap_or_default();
        label.truncate(end);
        let trimmed = label.trim_end_matches('-').len();
        label.truncate(trimmed);
    }
    format!("{}.{}", label, suffix)
}

/// The name of the cluster-scoped OAuth client registered for a workspace.
pub fn oauth_client_name(workspace_id: &str) -> String {
    format!("{}-oauth-client", workspace_id)
}

/// The name of the serving-certificate secret mounted by OAuth proxies.
pub fn proxy_tls_secret_name(workspace_id: &str) -> String {
    format!("{}-proxy-tls", workspace_id)
}

/// The name of the pod volume holding a Service's serving certificate.
pub fn serving_cert_volume_name(service_name: &str) -> String {
    format!("{}-serving-cert", service_name)
}

pub fn proxy_container_name(upstream_port: i32, proxy_port: i32) -> String {
    format!("oauth-proxy-{}-{}", upstream_port, proxy_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("endpoint1", "endpoint1")]
    #[case("My Endpoint", "my-endpoint")]
    #[case("--theia_dev--", "theia-dev")]
    #[case("a.b..c", "a-b-c")]
    fn sanitizes_endpoint_names(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(endpoint_name(name), expected);
    }

    #[test]
    fn hostname() {
        assert_eq!(
            endpoint_hostname("workspaceb978dc9bd4ba428b", "endpoint1", 8080, "test.routing"),
            "workspaceb978dc9bd4ba428b-endpoint1-8080.test.routing"
        );
    }

    #[test]
    fn hostname_truncated_to_label_limit() {
        let workspace_id = "w".repeat(60);
        let host = endpoint_hostname(&workspace_id, "ep", 8080, "example.com");
        let (label, suffix) = host.split_once('.').unwrap();
        assert_eq!(suffix, "example.com");
        assert!(label.len() <= MAX_LABEL_LEN);
        assert!(!label.ends_with('-'), "{label}");
    }

    #[rstest]
    #[case::wide_characters("ワ".repeat(30), 63)]
    #[case::boundary_inside_character(format!("{}é", "w".repeat(62)), 62)]
    fn hostname_truncation_keeps_characters_whole(
        #[case] workspace_id: String,
        #[case] expected_len: usize,
    ) {
        let host = endpoint_hostname(&workspace_id, "ep", 8080, "example.com");
        let (label, suffix) = host.split_once('.').unwrap();
        assert_eq!(suffix, "example.com");
        assert_eq!(label.len(), expected_len);
        assert!(workspace_id.starts_with(label), "{label}");
    }
}
