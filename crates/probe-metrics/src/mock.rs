//! Recording `MetricsSink` for unit tests

use crate::sink::MetricsSink;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call made against [`RecordingMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedMetric {
    Provision {
        group: String,
        storage_class: String,
        on_time: bool,
    },
    Mount {
        group: String,
        node: String,
        storage_class: String,
        on_time: bool,
    },
    IoLatency {
        group: String,
        node: String,
        storage_class: String,
        read_seconds: f64,
        write_seconds: f64,
    },
    Benchmark {
        group: String,
        node: String,
        storage_class: String,
        succeeded: bool,
    },
}

/// Sink that keeps every call in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    calls: Arc<Mutex<Vec<RecordedMetric>>>,
}

impl RecordingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedMetric>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything recorded so far, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedMetric> {
        self.lock().clone()
    }

    /// Only the on-time/late classifications
    #[must_use]
    pub fn classifications(&self) -> Vec<RecordedMetric> {
        self.lock()
            .iter()
            .filter(|m| matches!(m, RecordedMetric::Provision { .. } | RecordedMetric::Mount { .. }))
            .cloned()
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_provision_probe(&self, group: &str, storage_class: &str, on_time: bool) {
        self.lock().push(RecordedMetric::Provision {
            group: group.to_string(),
            storage_class: storage_class.to_string(),
            on_time,
        });
    }

    fn record_mount_probe(&self, group: &str, node: &str, storage_class: &str, on_time: bool) {
        self.lock().push(RecordedMetric::Mount {
            group: group.to_string(),
            node: node.to_string(),
            storage_class: storage_class.to_string(),
            on_time,
        });
    }

    fn set_io_latency(&self, group: &str, node: &str, storage_class: &str, read_seconds: f64, write_seconds: f64) {
        self.lock().push(RecordedMetric::IoLatency {
            group: group.to_string(),
            node: node.to_string(),
            storage_class: storage_class.to_string(),
            read_seconds,
            write_seconds,
        });
    }

    fn record_benchmark_result(&self, group: &str, node: &str, storage_class: &str, succeeded: bool) {
        self.lock().push(RecordedMetric::Benchmark {
            group: group.to_string(),
            node: node.to_string(),
            storage_class: storage_class.to_string(),
            succeeded,
        });
    }
}
