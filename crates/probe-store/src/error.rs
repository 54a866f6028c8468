//! Store errors

use thiserror::Error;

/// Errors returned by a [`crate::ProbeStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kubernetes kind
        kind: &'static str,
        /// `namespace/name` or `name`
        name: String,
    },

    /// Optimistic concurrency failure: stale resourceVersion, failed delete
    /// precondition or an object that already exists
    #[error("conflict on {kind} {name}: {message}")]
    Conflict {
        /// Kubernetes kind
        kind: &'static str,
        /// `namespace/name` or `name`
        name: String,
        /// Server message
        message: String,
    },

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Error injected by a test double
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// True when the object is already gone
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True for optimistic concurrency failures
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Kube(kube::Error::Api(ae)) => ae.code == 409 || ae.code == 412,
            _ => false,
        }
    }
}
