//! Probe Metrics
//!
//! Everything on the metrics side of the storage probe:
//!
//! - [`MetricsSink`]: the counters and gauges the controller reports into
//! - [`PrometheusMetrics`]: sink registered against an explicit `prometheus::Registry`
//! - [`collector`]: HTTP endpoint receiving [`ProbeReport`]s from probe pods and serving `/metrics`
//! - [`ReportSender`]: client used by probe workloads to post their report

pub mod collector;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod prometheus_sink;
pub mod report;
pub mod sender;
pub mod sink;

pub use collector::{CollectorState, router, serve};
pub use error::MetricsError;
#[cfg(feature = "test-util")]
pub use mock::{RecordedMetric, RecordingMetrics};
pub use prometheus_sink::PrometheusMetrics;
pub use report::ProbeReport;
pub use sender::ReportSender;
pub use sink::MetricsSink;
