//! Collector endpoint and report sender tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use probe_metrics::{
    CollectorState, MetricsError, PrometheusMetrics, ProbeReport, RecordedMetric, RecordingMetrics,
    ReportSender, router,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn report() -> ProbeReport {
    ProbeReport {
        group: "nightly".to_string(),
        node: "worker-1".to_string(),
        storage_class: "fast".to_string(),
        write_latency_seconds: 0.25,
        read_latency_seconds: 0.125,
        benchmark_succeeded: true,
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

#[tokio::test]
async fn test_valid_report_updates_sink() {
    let sink = RecordingMetrics::new();
    let app = router(CollectorState::new(Arc::new(sink.clone()), Registry::new()));

    let body = serde_json::to_vec(&report()).unwrap();
    let response = app.oneshot(post("/", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
    assert_eq!(
        sink.calls(),
        vec![
            RecordedMetric::IoLatency {
                group: "nightly".to_string(),
                node: "worker-1".to_string(),
                storage_class: "fast".to_string(),
                read_seconds: 0.125,
                write_seconds: 0.25,
            },
            RecordedMetric::Benchmark {
                group: "nightly".to_string(),
                node: "worker-1".to_string(),
                storage_class: "fast".to_string(),
                succeeded: true,
            },
        ]
    );
}

#[tokio::test]
async fn test_malformed_report_is_rejected() {
    let sink = RecordingMetrics::new();
    let app = router(CollectorState::new(Arc::new(sink.clone()), Registry::new()));

    let response = app
        .oneshot(post("/report", r#"{"group":"nightly","node":"worker-1"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(response).await.contains("storage_class"));
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint_renders_registry() {
    let registry = Registry::new();
    let metrics = PrometheusMetrics::new(&registry).unwrap();
    let app = router(CollectorState::new(Arc::new(metrics), registry));

    let response = app
        .clone()
        .oneshot(post("/", serde_json::to_vec(&report()).unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_string(response).await;
    assert!(text.contains("storage_probe_io_write_latency_seconds"));
    assert!(text.contains(r#"succeeded="true""#));
}

#[tokio::test]
async fn test_sender_delivers_to_live_collector() {
    let sink = RecordingMetrics::new();
    let app = router(CollectorState::new(Arc::new(sink.clone()), Registry::new()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let sender = ReportSender::new(format!("http://{addr}/"))
        .unwrap()
        .with_retry(3, Duration::from_millis(10));
    sender.send(&report()).await.unwrap();

    assert_eq!(sink.calls().len(), 2);
}

#[tokio::test]
async fn test_sender_gives_up_after_all_attempts() {
    // Reserve a port, then close it so nothing is listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sender = ReportSender::new(format!("http://{addr}/"))
        .unwrap()
        .with_retry(3, Duration::from_millis(10));
    match sender.send(&report()).await {
        Err(MetricsError::Send { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected send failure, got {other:?}"),
    }
}
