//! Prometheus metrics

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once; the
/// first installation wins.
pub fn init_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to install Prometheus recorder: {}", e);
                    PrometheusBuilder::new().build_recorder().handle()
                })
        })
        .clone()
}

/// Render current metrics for the `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

/// Counters recorded by the handlers.
pub mod names {
    pub const RETRIEVAL_REQUESTS: &str = "retrieval_requests_total";
    pub const RETRIEVAL_ERRORS: &str = "retrieval_errors_total";
    pub const ISOLATION_BREACHES: &str = "retrieval_isolation_breaches_total";
}
