//! Client side of the collector endpoint.
//!
//! Library surface for the probe workload binary, which lives outside this
//! workspace; the controller itself never sends reports.

use crate::error::MetricsError;
use crate::report::ProbeReport;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_PAUSE: Duration = Duration::from_secs(3);

/// Posts [`ProbeReport`]s to the collector with a bounded number of attempts
#[derive(Debug, Clone)]
pub struct ReportSender {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    pause: Duration,
}

impl ReportSender {
    /// Sender for `url` making 3 attempts, 3 seconds apart
    pub fn new(url: impl Into<String>) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            attempts: DEFAULT_ATTEMPTS,
            pause: DEFAULT_PAUSE,
        })
    }

    /// Override the retry policy. `attempts` is clamped to at least 1.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, pause: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.pause = pause;
        self
    }

    async fn post(&self, report: &ProbeReport) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(report)
            .send()
            .await?
            .error_for_status()
            .map(|_| ())
    }

    /// Post `report`, retrying on transport errors and non-2xx responses
    pub async fn send(&self, report: &ProbeReport) -> Result<(), MetricsError> {
        let mut attempt = 1;
        loop {
            match self.post(report).await {
                Ok(()) => {
                    info!(url = %self.url, attempt, "Probe report delivered");
                    return Ok(());
                }
                Err(e) if attempt < self.attempts => {
                    warn!(url = %self.url, attempt, "Failed to deliver probe report: {}", e);
                    tokio::time::sleep(self.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(MetricsError::Send {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
