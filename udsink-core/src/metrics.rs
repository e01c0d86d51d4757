use std::borrow::Cow;
use std::iter;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Error;
use crate::error::Result;

// The sink metrics live under this prefix
const UDSINK_REGISTRY_PREFIX: &str = "udsink";

// Note: no suffix on the names, the prometheus client infers it from the metric type
const REQUEST_TOTAL: &str = "request";
const SUCCESS_TOTAL: &str = "success";
const FAILED_TOTAL: &str = "failed";
const DROPPED_TOTAL: &str = "dropped";
const SKIPPED_TOTAL: &str = "skipped";
const DUPLICATE_TOTAL: &str = "duplicate";
const ANOMALY_GENERATED_TOTAL: &str = "anomaly_generated";
const REQUEST_LATENCY: &str = "request_latency";
const REQUEST_SIZE: &str = "request_size";

const NAMESPACE_LABEL: &str = "namespace";
const APP_LABEL: &str = "app";
const NAME_LABEL: &str = "name";

/// Metrics of one sink process. Created once and shared behind an [Arc].
#[derive(Debug, Clone)]
pub struct SinkMetrics {
    /// Delivery attempts, retries included.
    pub request_total: Counter,
    /// Batches delivered.
    pub success_total: Counter,
    /// Batches answered with failed responses.
    pub failed_total: Counter,
    /// Batches acknowledged although delivery failed.
    pub dropped_total: Counter,
    /// Records left out of a batch because they could not be decoded.
    pub skipped_total: Counter,
    /// Records suppressed as duplicates.
    pub duplicate_total: Counter,
    pub anomaly_generated_total: Family<Vec<(String, String)>, Counter>,
    /// Microseconds per attempt.
    pub request_latency: Histogram,
    /// Bytes per outbound unit.
    pub request_size: Histogram,
}

/// Exponential bucket distribution with range.
/// Creates `length` buckets, where the lowest bucket is `min` and the highest bucket is `max`.
/// Callers pass a positive `min` and a `length` of at least 2.
fn exponential_buckets_range(min: f64, max: f64, length: u16) -> impl Iterator<Item = f64> {
    // We know max/min and highest bucket. Solve for growth_factor.
    let growth_factor = (max / min).powf(1.0 / (f64::from(length) - 1.0));

    iter::repeat(())
        .enumerate()
        .map(move |(i, _)| min * growth_factor.powf(i as f64))
        .take(length.into())
}

impl SinkMetrics {
    /// Registers the sink metrics under `udsink_`, each carrying `const_labels`.
    pub fn new(registry: &mut Registry, const_labels: Vec<(String, String)>) -> Self {
        let metrics = Self {
            request_total: Counter::default(),
            success_total: Counter::default(),
            failed_total: Counter::default(),
            dropped_total: Counter::default(),
            skipped_total: Counter::default(),
            duplicate_total: Counter::default(),
            anomaly_generated_total: Family::default(),
            // 100 microseconds to 15 minutes
            request_latency: Histogram::new(exponential_buckets_range(
                100.0,
                60000000.0 * 15.0,
                10,
            )),
            // 64 bytes to 16 MiB
            request_size: Histogram::new(exponential_buckets_range(
                64.0,
                16.0 * 1024.0 * 1024.0,
                10,
            )),
        };

        let registry = registry.sub_registry_with_prefix(UDSINK_REGISTRY_PREFIX);
        let registry = registry.sub_registry_with_labels(
            const_labels
                .into_iter()
                .map(|(k, v)| (Cow::Owned(k), Cow::Owned(v))),
        );

        registry.register(
            REQUEST_TOTAL,
            "A Counter to keep track of the total number of delivery attempts",
            metrics.request_total.clone(),
        );
        registry.register(
            SUCCESS_TOTAL,
            "A Counter to keep track of the total number of batches delivered",
            metrics.success_total.clone(),
        );
        registry.register(
            FAILED_TOTAL,
            "A Counter to keep track of the total number of batches that failed delivery",
            metrics.failed_total.clone(),
        );
        registry.register(
            DROPPED_TOTAL,
            "A Counter to keep track of the total number of batches dropped after exhausting retries",
            metrics.dropped_total.clone(),
        );
        registry.register(
            SKIPPED_TOTAL,
            "A Counter to keep track of the total number of records skipped as undecodable",
            metrics.skipped_total.clone(),
        );
        registry.register(
            DUPLICATE_TOTAL,
            "A Counter to keep track of the total number of records suppressed as duplicates",
            metrics.duplicate_total.clone(),
        );
        registry.register(
            ANOMALY_GENERATED_TOTAL,
            "A Counter to keep track of the anomaly samples pushed, per namespace, app and name",
            metrics.anomaly_generated_total.clone(),
        );
        registry.register(
            REQUEST_LATENCY,
            "A Histogram to keep track of the time taken by a delivery attempt, in microseconds",
            metrics.request_latency.clone(),
        );
        registry.register(
            REQUEST_SIZE,
            "A Histogram to keep track of the size of the outbound unit, in bytes",
            metrics.request_size.clone(),
        );

        metrics
    }

    pub fn inc_anomaly_generated(&self, namespace: &str, app: &str, name: &str) {
        self.anomaly_generated_total
            .get_or_create(&vec![
                (NAMESPACE_LABEL.to_string(), namespace.to_string()),
                (APP_LABEL.to_string(), app.to_string()),
                (NAME_LABEL.to_string(), name.to_string()),
            ])
            .inc();
    }
}

// metrics_handler is used to generate and return a snapshot of the
// current state of the metrics in the registry
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry) {
        error!(error = ?e, "Encoding metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    debug!("Exposing metrics: {:?}", buffer);
    Response::builder()
        .status(StatusCode::OK)
        .header(
            axum::http::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(Body::from(buffer))
        .map_or_else(
            |_| StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            IntoResponse::into_response,
        )
}

/// router for metrics and k8s health endpoints
fn metrics_router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/livez", get(livez))
        .route("/readyz", get(livez))
        .with_state(registry)
}

async fn livez() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Serves the registry until `cancel` fires.
pub async fn start_metrics_server(
    addr: SocketAddr,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Metrics(format!("Binding metrics server to {addr}: {e}")))?;
    info!(?addr, "Metrics server listening");
    serve_metrics(listener, registry, cancel).await
}

async fn serve_metrics(
    listener: TcpListener,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> Result<()> {
    axum::serve(listener, metrics_router(registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Metrics(format!("Starting web server for metrics: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_buckets_range() {
        let buckets: Vec<f64> = exponential_buckets_range(1.0, 100.0, 3).collect();
        assert_eq!(buckets.len(), 3);
        assert!((buckets[0] - 1.0).abs() < 1e-9);
        assert!((buckets[1] - 10.0).abs() < 1e-9);
        assert!((buckets[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_metric_names() {
        let mut registry = Registry::default();
        let metrics = SinkMetrics::new(
            &mut registry,
            vec![("pipeline".to_string(), "rollouts".to_string())],
        );

        metrics.request_total.inc();
        metrics.success_total.inc();
        metrics.failed_total.inc();
        metrics.dropped_total.inc();
        metrics.skipped_total.inc();
        metrics.duplicate_total.inc();
        metrics.inc_anomaly_generated("ns", "app", "cpu_anomaly");
        metrics.request_latency.observe(50.0);
        metrics.request_size.observe(10.0);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();

        let expected = [
            r#"udsink_request_total{pipeline="rollouts"} 1"#,
            r#"udsink_success_total{pipeline="rollouts"} 1"#,
            r#"udsink_failed_total{pipeline="rollouts"} 1"#,
            r#"udsink_dropped_total{pipeline="rollouts"} 1"#,
            r#"udsink_skipped_total{pipeline="rollouts"} 1"#,
            r#"udsink_duplicate_total{pipeline="rollouts"} 1"#,
            r#"namespace="ns",app="app",name="cpu_anomaly"} 1"#,
            r#"udsink_request_latency_count{pipeline="rollouts"} 1"#,
            r#"udsink_request_latency_sum{pipeline="rollouts"} 50.0"#,
            r#"udsink_request_size_count{pipeline="rollouts"} 1"#,
        ];

        for t in expected {
            assert!(buffer.contains(t), "missing {t} in\n{buffer}");
        }
    }

    #[tokio::test]
    async fn test_metrics_server() {
        let mut registry = Registry::default();
        let metrics = SinkMetrics::new(&mut registry, vec![]);
        metrics.success_total.inc();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_metrics(
            listener,
            Arc::new(registry),
            cancel.clone(),
        ));

        let client = reqwest::Client::new();
        let body = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("udsink_success_total 1"));

        for path in ["livez", "readyz"] {
            let resp = client
                .get(format!("http://{addr}/{path}"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        }

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
