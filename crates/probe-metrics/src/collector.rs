//! Collector endpoint
//!
//! Mount probes POST a [`ProbeReport`] to `/` when they finish. The report is
//! folded into the metrics sink and the whole registry is served on
//! `/metrics` for Prometheus to scrape.

use crate::error::MetricsError;
use crate::report::ProbeReport;
use crate::sink::MetricsSink;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state of the collector endpoint
#[derive(Clone)]
pub struct CollectorState {
    sink: Arc<dyn MetricsSink>,
    registry: Registry,
}

impl std::fmt::Debug for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorState").finish_non_exhaustive()
    }
}

impl CollectorState {
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>, registry: Registry) -> Self {
        Self { sink, registry }
    }
}

async fn receive_report(State(state): State<CollectorState>, body: Bytes) -> impl IntoResponse {
    let report: ProbeReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => {
            warn!("Rejected malformed probe report: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    debug!(
        group = %report.group,
        node = %report.node,
        storage_class = %report.storage_class,
        "Received probe report"
    );
    state.sink.set_io_latency(
        &report.group,
        &report.node,
        &report.storage_class,
        report.read_latency_seconds,
        report.write_latency_seconds,
    );
    state.sink.record_benchmark_result(
        &report.group,
        &report.node,
        &report.storage_class,
        report.benchmark_succeeded,
    );

    (StatusCode::OK, "OK".to_string())
}

async fn metrics(State(state): State<CollectorState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], e.to_string().into_bytes());
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], buffer)
}

/// Collector routes: `POST /`, `POST /report` and `GET /metrics`
pub fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/", post(receive_report))
        .route("/report", post(receive_report))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the collector until `shutdown` is cancelled
pub async fn serve(addr: SocketAddr, state: CollectorState, shutdown: CancellationToken) -> Result<(), MetricsError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Starting probe report collector");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Probe report collector stopped");
    Ok(())
}
