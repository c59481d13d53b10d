//! Prometheus metrics
//!
//! One recorder installed at startup, exposed at `GET /metrics`. Handlers
//! and the pipeline both just call the `metrics` facade macros; this
//! module only owns the exporter and the handler that renders it.

use axum::extract::State;
use axum::http::StatusCode;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

/// A handle with no global recorder installed, for tests that only need
/// `AppState` to hold *a* handle and never assert on recorded values.
#[cfg(test)]
pub fn test_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    Ok(state.metrics.render())
}

/// `endpoint` is the route name (`process_request`, `process_request_workflow`,
/// `process_response`), `status` is `ok` or `error`.
pub fn record_request(endpoint: &str, status: &str) {
    metrics::counter!("ragbridge_requests_total", "endpoint" => endpoint.to_string(), "status" => status.to_string())
        .increment(1);
}

pub fn record_request_latency(endpoint: &str, millis: f64) {
    metrics::histogram!("ragbridge_request_latency_ms", "endpoint" => endpoint.to_string()).record(millis);
}

pub fn record_stage_latency(stage: &str, millis: f64) {
    metrics::histogram!("ragbridge_stage_latency_ms", "stage" => stage.to_string()).record(millis);
}

pub fn record_fallback(stage: &str) {
    metrics::counter!("ragbridge_fallbacks_total", "stage" => stage.to_string()).increment(1);
}

pub fn record_enrichment_dropped() {
    metrics::counter!("ragbridge_enrichment_dropped_total").increment(1);
}
