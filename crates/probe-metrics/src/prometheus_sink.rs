//! Prometheus implementation of [`MetricsSink`]

use crate::error::MetricsError;
use crate::sink::MetricsSink;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use tracing::warn;

const NAMESPACE: &str = "storage_probe";

fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Probe metrics registered against a caller-supplied registry
#[derive(Clone, Debug)]
pub struct PrometheusMetrics {
    provision_probe_total: CounterVec,
    mount_probe_total: CounterVec,
    read_latency_seconds: GaugeVec,
    write_latency_seconds: GaugeVec,
    performance_probe_total: CounterVec,
}

impl PrometheusMetrics {
    /// Create the metric families and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let provision_probe_total = CounterVec::new(
            Opts::new("provision_probe_total", "Provision probe attempts by timeliness").namespace(NAMESPACE),
            &["probe_group", "storage_class", "on_time"],
        )?;
        let mount_probe_total = CounterVec::new(
            Opts::new("mount_probe_total", "Mount probe attempts by timeliness").namespace(NAMESPACE),
            &["probe_group", "node", "storage_class", "on_time"],
        )?;
        let read_latency_seconds = GaugeVec::new(
            Opts::new("io_read_latency_seconds", "Read latency reported by the last mount probe").namespace(NAMESPACE),
            &["probe_group", "node", "storage_class"],
        )?;
        let write_latency_seconds = GaugeVec::new(
            Opts::new("io_write_latency_seconds", "Write latency reported by the last mount probe").namespace(NAMESPACE),
            &["probe_group", "node", "storage_class"],
        )?;
        let performance_probe_total = CounterVec::new(
            Opts::new("performance_probe_total", "Benchmark runs by outcome").namespace(NAMESPACE),
            &["probe_group", "node", "storage_class", "succeeded"],
        )?;

        registry.register(Box::new(provision_probe_total.clone()))?;
        registry.register(Box::new(mount_probe_total.clone()))?;
        registry.register(Box::new(read_latency_seconds.clone()))?;
        registry.register(Box::new(write_latency_seconds.clone()))?;
        registry.register(Box::new(performance_probe_total.clone()))?;

        Ok(Self {
            provision_probe_total,
            mount_probe_total,
            read_latency_seconds,
            write_latency_seconds,
            performance_probe_total,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_provision_probe(&self, group: &str, storage_class: &str, on_time: bool) {
        match self
            .provision_probe_total
            .get_metric_with_label_values(&[group, storage_class, bool_label(on_time)])
        {
            Ok(counter) => counter.inc(),
            Err(e) => warn!("Failed to record provision probe for {}: {}", group, e),
        }
    }

    fn record_mount_probe(&self, group: &str, node: &str, storage_class: &str, on_time: bool) {
        match self
            .mount_probe_total
            .get_metric_with_label_values(&[group, node, storage_class, bool_label(on_time)])
        {
            Ok(counter) => counter.inc(),
            Err(e) => warn!("Failed to record mount probe for {}/{}: {}", group, node, e),
        }
    }

    fn set_io_latency(&self, group: &str, node: &str, storage_class: &str, read_seconds: f64, write_seconds: f64) {
        let labels = [group, node, storage_class];
        match (
            self.read_latency_seconds.get_metric_with_label_values(&labels),
            self.write_latency_seconds.get_metric_with_label_values(&labels),
        ) {
            (Ok(read), Ok(write)) => {
                read.set(read_seconds);
                write.set(write_seconds);
            }
            (Err(e), _) | (_, Err(e)) => warn!("Failed to set I/O latency for {}/{}: {}", group, node, e),
        }
    }

    fn record_benchmark_result(&self, group: &str, node: &str, storage_class: &str, succeeded: bool) {
        match self
            .performance_probe_total
            .get_metric_with_label_values(&[group, node, storage_class, bool_label(succeeded)])
        {
            Ok(counter) => counter.inc(),
            Err(e) => warn!("Failed to record benchmark result for {}/{}: {}", group, node, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    /// Value of the first sample of `name` carrying every `key="value"` label
    fn sample(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        text.lines()
            .filter(|line| line.starts_with(&format!("{name}{{")))
            .find(|line| labels.iter().all(|(k, v)| line.contains(&format!("{k}=\"{v}\""))))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_provision_counter_is_split_by_timeliness() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();

        metrics.record_provision_probe("g", "fast", true);
        metrics.record_provision_probe("g", "fast", true);
        metrics.record_provision_probe("g", "fast", false);

        let name = "storage_probe_provision_probe_total";
        assert_eq!(sample(&registry, name, &[("on_time", "true")]), Some(2.0));
        assert_eq!(sample(&registry, name, &[("on_time", "false")]), Some(1.0));
    }

    #[test]
    fn test_latency_gauges_keep_last_value() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();

        metrics.set_io_latency("g", "node-a", "fast", 0.5, 0.25);
        metrics.set_io_latency("g", "node-a", "fast", 0.1, 0.2);

        let labels = [("node", "node-a")];
        assert_eq!(sample(&registry, "storage_probe_io_read_latency_seconds", &labels), Some(0.1));
        assert_eq!(sample(&registry, "storage_probe_io_write_latency_seconds", &labels), Some(0.2));
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        PrometheusMetrics::new(&registry).unwrap();
        assert!(PrometheusMetrics::new(&registry).is_err());
    }
}
