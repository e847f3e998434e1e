//! Labels and annotations written onto generated objects.

use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// Identifies the workspace that owns an object. Also used as a list filter.
pub const WORKSPACE_ID: &str = "controller.devfile.io/workspace_id";

/// The human-readable name of the workspace that owns an object.
pub const WORKSPACE_NAME: &str = "controller.devfile.io/workspace_name";

/// Maps an Ingress or Route back to the endpoint it exposes.
pub const ENDPOINT_NAME: &str = "controller.devfile.io/endpoint_name";

/// Copied from a routing instance onto the objects generated for it.
pub const RESTRICTED_ACCESS: &str = "controller.devfile.io/restricted-access";

/// Marks a Service that is addressable by an endpoint's stable name.
pub const DISCOVERABLE_SERVICE: &str = "controller.devfile.io/discoverable-service";

/// Asks the OpenShift service CA to issue a serving certificate into the named secret.
pub const SERVING_CERT_SECRET: &str = "service.alpha.openshift.io/serving-cert-secret-name";

/// Returns a label selector matching every object owned by `workspace_id`.
pub fn workspace_selector(workspace_id: &str) -> String {
    format!("{}={}", WORKSPACE_ID, workspace_id)
}

/// Returns the labels applied to every object generated for `workspace_id`.
pub fn workspace_labels(workspace_id: &str) -> Map {
    Some((WORKSPACE_ID.to_string(), workspace_id.to_string()))
        .into_iter()
        .collect()
}
