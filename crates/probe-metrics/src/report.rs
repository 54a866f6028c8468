//! Wire format of the report a probe pod posts to the collector

use serde::{Deserialize, Serialize};

/// Result of one mount probe run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub group: String,
    pub node: String,
    pub storage_class: String,
    pub write_latency_seconds: f64,
    pub read_latency_seconds: f64,
    pub benchmark_succeeded: bool,
}
