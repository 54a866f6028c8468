//! Metrics errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registering a collector with the registry failed
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Binding or serving the collector endpoint failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Posting a report failed on every attempt
    #[error("failed to send probe report after {attempts} attempts: {source}")]
    Send {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The report client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
