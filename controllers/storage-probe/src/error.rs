//! Controller-specific error types.

use crds::CrdError;
use probe_metrics::MetricsError;
use probe_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the storage probe controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside of the store (client construction)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Metrics registration or collector failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// StorageProbe spec failed validation; nothing is written for it
    #[error("Invalid StorageProbe {name}: {reason}")]
    Validation {
        /// `namespace/name` of the StorageProbe
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An object lacks the name, namespace or uid needed to act on it
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    pub(crate) fn validation(name: impl Into<String>, err: &CrdError) -> Self {
        ControllerError::Validation {
            name: name.into(),
            reason: err.to_string(),
        }
    }
}
