//! OpenShift resource types that are not part of the core Kubernetes API.

use k8s_openapi::{apimachinery::pkg::util::intstr::IntOrString, ClusterResourceScope};
use kube::{api::ObjectMeta, CustomResource};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Exposes a Service at an externally reachable host.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    status = "RouteStatus",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Left empty to have the router assign a host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub to: RouteTargetReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub termination: TlsTermination,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<InsecureEdgeTerminationPolicy>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsTermination {
    Edge,
    Passthrough,
    Reencrypt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum InsecureEdgeTerminationPolicy {
    None,
    Allow,
    Redirect,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_name: Option<String>,
}

/// A cluster-scoped OAuth client registration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(rename = "redirectURIs", default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_method: Option<String>,
}

// === impl Route ===

impl Route {
    /// The host the route is reachable at: the requested host, or else the
    /// host assigned by the first router admitting it.
    pub fn assigned_host(&self) -> Option<&str> {
        if let Some(host) = self.spec.host.as_deref().filter(|h| !h.is_empty()) {
            return Some(host);
        }
        self.status
            .as_ref()?
            .ingress
            .first()?
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
    }
}

// === impl OAuthClient ===

impl OAuthClient {
    const GROUP: &'static str = "oauth.openshift.io";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "OAuthClient";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: format!("{}/{}", Self::GROUP, Self::VERSION),
            kind: Self::KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl kube::Resource for OAuthClient {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Self::KIND.into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        Self::GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        Self::VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "oauthclients".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
