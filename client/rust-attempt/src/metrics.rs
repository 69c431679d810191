use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref ATTEMPTS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_started_total",
        "Total number of quiz attempts started, by how the state was obtained",
        &["mode"]
    )
    .unwrap();

    pub static ref ATTEMPTS_ACTIVE: IntGauge = register_int_gauge!(
        "attempts_active",
        "Number of attempts with a running timer loop"
    )
    .unwrap();

    pub static ref ATTEMPT_AUTOSAVES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempt_autosaves_total",
        "Total number of attempt slot writes",
        &["trigger", "status"]
    )
    .unwrap();

    pub static ref ATTEMPT_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempt_submissions_total",
        "Total number of submission calls",
        &["reason", "outcome"]
    )
    .unwrap();

    pub static ref API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempt_api_requests_total",
        "Total number of backend API requests",
        &["endpoint", "status"]
    )
    .unwrap();

    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "attempt_api_request_duration_seconds",
        "Backend API request duration in seconds",
        &["endpoint"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a backend call with metrics
pub async fn track_api_request<F, T, E>(endpoint: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    API_REQUESTS_TOTAL
        .with_label_values(&[endpoint, status])
        .inc();

    API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(duration);

    result
}

pub fn record_autosave(trigger: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };
    ATTEMPT_AUTOSAVES_TOTAL
        .with_label_values(&[trigger, status])
        .inc();
}

pub fn record_submission(reason: &str, outcome: &str) {
    ATTEMPT_SUBMISSIONS_TOTAL
        .with_label_values(&[reason, outcome])
        .inc();
}
