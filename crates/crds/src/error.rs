//! CRD validation errors

use thiserror::Error;

/// Errors raised while validating a `StorageProbe` spec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrdError {
    /// A duration string could not be parsed
    #[error("invalid duration {0:?}: {1}")]
    InvalidDuration(String, &'static str),

    /// probePeriod outside of 1..=59 minutes
    #[error("probePeriod must be between 1 and 59 minutes, got {0}")]
    InvalidPeriod(u32),

    /// probeThreshold is not strictly shorter than probePeriod
    #[error("probeThreshold {threshold} must be shorter than probePeriod of {period_minutes}m")]
    ThresholdNotBelowPeriod {
        /// Threshold as written in the spec
        threshold: String,
        /// Period in minutes
        period_minutes: u32,
    },

    /// monitoringStorageClass is empty
    #[error("monitoringStorageClass must not be empty")]
    MissingStorageClass,
}
