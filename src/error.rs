//! Error taxonomy shared by every component.
//!
//! Call sites match on [`CoreError`] variants rather than strings: C6 retries
//! only on `Conflict`, C5 maps `Invalid`/`Timeout` onto specific HTTP
//! statuses, and `main` treats `Fatal` as a reason to exit non-zero.

use thiserror::Error;

/// The tagged error union described in the error handling design.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    /// A compare-and-swap write lost a race; the caller may retry.
    #[error("conflicting update to {kind} '{name}'")]
    Conflict { kind: &'static str, name: String },
    /// Caller-supplied input violates a schema or invariant. Never retried.
    #[error("invalid input: {0}")]
    Invalid(String),
    /// An awaited event (report, pod phase) did not occur in time.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The API server or the leadership lease is unreachable right now.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// A bootstrap-level failure; the process should exit.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

/// Classify a `kube::Error` the way every store operation does: HTTP 404s
/// become `NotFound`, 409s become `Conflict`, everything else is
/// `Unavailable` (the API server itself is the thing that's unreachable).
impl From<kube::Error> for CoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => CoreError::NotFound {
                kind: "resource",
                name: resp.message.clone(),
            },
            kube::Error::Api(resp) if resp.code == 409 => CoreError::Conflict {
                kind: "resource",
                name: resp.message.clone(),
            },
            other => CoreError::Unavailable(other.to_string()),
        }
    }
}
