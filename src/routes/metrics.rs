use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the metrics the annotator emits.
pub fn describe() {
    metrics::describe_counter!("annotations_total", "Labels assigned, by label value");
    metrics::describe_gauge!(
        "annotation_progress_ratio",
        "Fraction of the loaded dataset that is labeled"
    );
    metrics::describe_counter!("sync_attempts_total", "Dataset uploads attempted");
    metrics::describe_counter!("sync_failures_total", "Dataset uploads that failed, by reason");
    metrics::describe_histogram!(
        "sync_duration_seconds",
        "Time to serialize and upload a dataset snapshot"
    );
}

/// GET /metrics — Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
