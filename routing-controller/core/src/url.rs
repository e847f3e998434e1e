//! Composes the externally reachable URL of an endpoint from the host and
//! base path of the object exposing it.

/// The parts of an endpoint that shape its URL.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UrlEndpoint<'a> {
    /// The endpoint's declared protocol, used as the URL scheme.
    pub protocol: &'a str,

    /// Whether the endpoint asks to be served over a secure transport.
    pub secure: bool,

    /// The endpoint's own path. May carry a query string or fragment.
    pub path: &'a str,
}

/// Resolves the URL for `endpoint` exposed at `host` under `base_path`.
///
/// The scheme is upgraded to its secure variant only when the transport is
/// TLS-terminated _and_ the endpoint itself is marked secure.
pub fn resolve_url(
    endpoint: UrlEndpoint<'_>,
    host: &str,
    base_path: &str,
    transport_secure: bool,
) -> String {
    let scheme = if transport_secure && endpoint.secure {
        secure_scheme(endpoint.protocol)
    } else {
        endpoint.protocol
    };
    format!("{}://{}{}", scheme, host, join_path(base_path, endpoint.path))
}

/// Returns the secure variant of `protocol` (e.g. `http` -> `https`).
///
/// Unrecognized protocols are returned unmodified.
pub fn secure_scheme(protocol: &str) -> &str {
    match protocol {
        "http" => "https",
        "ws" => "wss",
        other => other,
    }
}

fn join_path(base_path: &str, endpoint_path: &str) -> String {
    // A query string or fragment is appended after the joined path as-is.
    let (path, suffix) = match endpoint_path.find(|c| c == '?' || c == '#') {
        Some(idx) => endpoint_path.split_at(idx),
        None => (endpoint_path, ""),
    };

    let mut joined = match (base_path.is_empty(), path.is_empty()) {
        (true, true) => String::new(),
        (false, true) => base_path.to_string(),
        (true, false) => path.to_string(),
        (false, false) => format!(
            "{}/{}",
            base_path.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
    };

    if !joined.is_empty() && !joined.starts_with('/') {
        joined.insert(0, '/');
    }
    if joined.is_empty() && !suffix.is_empty() {
        joined.push('/');
    }
    joined.push_str(suffix);
    joined
}
