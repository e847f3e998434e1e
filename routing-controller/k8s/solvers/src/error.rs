use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    /// The routing class is managed by some other controller.
    #[error("routing class {class:?} is not supported by this controller")]
    NotSupported { class: String },

    #[error("workspace routing is invalid: {reason}")]
    Invalid { reason: String },

    /// The routing cannot be completed yet and should be retried.
    #[error("controller not ready to resolve the workspace routing")]
    NotReady { retry_after: Option<Duration> },

    #[error("discoverable endpoint '{endpoint_name}' is already in use by {}", occupant(.workspace_name))]
    ServiceConflict {
        endpoint_name: String,
        workspace_name: Option<String>,
    },

    #[error("routing class {class:?} requires an OpenShift cluster")]
    PlatformUnsupported { class: String },

    #[error("could not resolve endpoint '{endpoint}': {reason}")]
    EndpointUnresolvable { endpoint: String, reason: String },
}

// === impl SolverError ===

impl SolverError {
    /// The delay applied to `NotReady` errors that do not suggest one.
    pub const DEFAULT_RETRY: Duration = Duration::from_secs(1);

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Whether the error should move the routing into the failed phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. }
                | Self::ServiceConflict { .. }
                | Self::PlatformUnsupported { .. }
                | Self::EndpointUnresolvable { .. }
        )
    }

    /// The delay before the routing should be retried, if the error is transient.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NotReady { retry_after } => Some(retry_after.unwrap_or(Self::DEFAULT_RETRY)),
            _ => None,
        }
    }
}

fn occupant(workspace_name: &Option<String>) -> String {
    match workspace_name {
        Some(name) => format!("workspace '{}'", name),
        None => "another workspace".to_string(),
    }
}
