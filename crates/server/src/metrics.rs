//! Prometheus metrics
//!
//! The engine records through the `metrics` facade; this module installs
//! the Prometheus recorder and serves the scrape endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Idempotent; later calls return the
/// existing handle.
pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("metrics recorder can only be installed once per process")
        })
        .clone()
}

/// `GET /metrics`
pub async fn metrics_handler() -> String {
    match HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

/// Request-level counters recorded at the HTTP boundary
pub fn record_request(endpoint: &'static str) {
    metrics::counter!("dialogue_http_requests_total", "endpoint" => endpoint).increment(1);
}

pub fn record_rejected(endpoint: &'static str) {
    metrics::counter!("dialogue_http_rejected_total", "endpoint" => endpoint).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_render_without_recorder_is_empty() {
        // Depending on test ordering the recorder may or may not be
        // installed; the handler must not panic either way.
        let _ = metrics_handler().await;
    }
}
