use workspace_routing_k8s_api::labels::Map;

/// Controller-wide routing configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutingConfig {
    pub platform: Platform,

    /// Substituted for instances that do not set a routing class.
    pub default_routing_class: Option<String>,

    /// Used when an instance does not set a routing suffix.
    pub cluster_host_suffix: Option<String>,

    /// Replaces the default Ingress annotations when set.
    pub ingress_annotations: Option<Map>,

    /// Replaces the default Route annotations when set.
    pub route_annotations: Option<Map>,

    pub proxy: ProxyConfig,
}

/// The cluster flavor, which decides how public endpoints are exposed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Platform {
    #[default]
    Kubernetes,
    OpenShift,
}

/// Configures the authenticating proxy sidecar.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyConfig {
    pub image: String,
    pub pull_policy: Option<String>,
}

// === impl Platform ===

impl Platform {
    pub fn is_openshift(&self) -> bool {
        matches!(self, Self::OpenShift)
    }
}

// === impl ProxyConfig ===

impl ProxyConfig {
    pub const DEFAULT_IMAGE: &'static str = "quay.io/openshift/origin-oauth-proxy:4.7";
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            image: Self::DEFAULT_IMAGE.to_string(),
            pull_policy: None,
        }
    }
}
