//! `MetricsSink` trait

/// Push-style sink for probe outcomes.
///
/// Emission never fails the caller: implementations log and swallow their
/// own errors.
pub trait MetricsSink: Send + Sync {
    /// One provision probe attempt, classified on-time or late
    fn record_provision_probe(&self, group: &str, storage_class: &str, on_time: bool);

    /// One mount probe attempt, classified on-time or late
    fn record_mount_probe(&self, group: &str, node: &str, storage_class: &str, on_time: bool);

    /// Latest read and write latency reported by a mount probe
    fn set_io_latency(&self, group: &str, node: &str, storage_class: &str, read_seconds: f64, write_seconds: f64);

    /// Whether the benchmark subprocess of a mount probe succeeded
    fn record_benchmark_result(&self, group: &str, node: &str, storage_class: &str, succeeded: bool);
}
