use crate::labels::{self, Map};
use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Describes the network exposure of a single workspace.
///
/// Created by the workspace controller. The routing controller owns its status.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "controller.devfile.io",
    version = "v1alpha1",
    kind = "DevWorkspaceRouting",
    root = "RoutingInstance",
    plural = "devworkspaceroutings",
    shortname = "dwr",
    status = "RoutingInstanceStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RoutingInstanceSpec {
    pub workspace_id: String,

    /// Selects the strategy that exposes this workspace. Empty selects the
    /// controller's default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub routing_class: String,

    /// The DNS suffix of generated hostnames.
    #[serde(default)]
    pub routing_suffix: String,

    /// Endpoints, keyed by the name of the component declaring them.
    #[serde(default)]
    pub endpoints: BTreeMap<String, Vec<EndpointSpec>>,

    /// Selects the workspace pod from generated Services.
    #[serde(default)]
    pub pod_selector: Map,

    /// Per-component overrides merged onto the shared Service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<BTreeMap<String, ServiceOverride>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ServiceOverride {
    #[serde(default)]
    pub annotations: Map,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub name: String,
    pub target_port: i32,

    #[serde(default)]
    pub exposure: Exposure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default)]
    pub secure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,

    /// Annotations for this endpoint's Ingress or Route.
    ///
    /// When set, even to an empty map, they replace the platform defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Map>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    /// Reachable from outside the cluster.
    #[default]
    Public,
    /// Reachable from within the cluster only.
    Internal,
    /// Not exposed.
    None,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<RoutingPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_additions: Option<PodAdditions>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_endpoints: BTreeMap<String, Vec<ExposedEndpoint>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The generation last processed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum RoutingPhase {
    Preparing,
    Ready,
    Failed,
}

/// Pod-level additions, such as proxy sidecars, to be merged into the
/// workspace pod.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodAdditions {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub labels: Map,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ExposedEndpoint {
    pub name: String,
    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

// === impl RoutingInstance ===

impl RoutingInstance {
    /// Blocks deletion until cluster-scoped side effects are cleaned up.
    pub const FINALIZER: &'static str = "workspacerouting.controller.devfile.io";

    /// The workspace's name, falling back to the instance's own name.
    pub fn workspace_name(&self) -> String {
        self.labels()
            .get(labels::WORKSPACE_NAME)
            .cloned()
            .unwrap_or_else(|| self.name_any())
    }

    pub fn restricted_access(&self) -> Option<&str> {
        self.annotations()
            .get(labels::RESTRICTED_ACCESS)
            .map(String::as_str)
    }

    pub fn phase(&self) -> Option<RoutingPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == Self::FINALIZER)
    }
}

// === impl EndpointSpec ===

impl EndpointSpec {
    pub const DISCOVERABLE_ATTRIBUTE: &'static str = "discoverable";
    pub const TYPE_ATTRIBUTE: &'static str = "type";

    /// The endpoint's protocol, `http` when unset.
    pub fn protocol(&self) -> &str {
        match self.protocol.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => "http",
        }
    }

    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    /// Whether the endpoint should be addressable by its own stable Service name.
    pub fn is_discoverable(&self) -> bool {
        match self.attributes.get(Self::DISCOVERABLE_ATTRIBUTE) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// The value of the endpoint's `type` attribute, e.g. `terminal`.
    pub fn endpoint_type(&self) -> Option<&str> {
        self.attributes
            .get(Self::TYPE_ATTRIBUTE)
            .and_then(serde_json::Value::as_str)
    }
}

// === impl PodAdditions ===

impl PodAdditions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for RoutingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => "Preparing".fmt(f),
            Self::Ready => "Ready".fmt(f),
            Self::Failed => "Failed".fmt(f),
        }
    }
}
