use crate::solvers::SolverError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),
}

// === impl Error ===

impl Error {
    /// Whether the API server rejected an object as invalid. Retrying the
    /// same object cannot succeed.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Kube(error) if api_code(error) == Some(422))
    }
}

pub(crate) fn api_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(rsp) => Some(rsp.code),
        _ => None,
    }
}

pub(crate) fn is_not_found(error: &kube::Error) -> bool {
    api_code(error) == Some(404)
}

/// Conflicts (stale resource versions, or creates racing an existing
/// object) are resolved by retrying the reconcile.
pub(crate) fn is_conflict(error: &kube::Error) -> bool {
    api_code(error) == Some(409)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}
