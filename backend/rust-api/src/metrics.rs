use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Unlock engine metrics
    pub static ref UNITS_UNLOCKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "units_unlocked_total",
        "Total number of locked -> unlocked unit transitions applied",
        &["trigger"]
    )
    .unwrap();

    pub static ref VIDEOS_UNLOCKED_TOTAL: IntCounter = register_int_counter!(
        "videos_unlocked_total",
        "Total number of videos added to per-student unlocked sets"
    )
    .unwrap();

    pub static ref RECALCULATE_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recalculate_runs_total",
        "Total number of full recomputation runs",
        &["status"]
    )
    .unwrap();

    pub static ref PROPAGATION_STUDENT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "propagation_student_failures_total",
        "Students skipped inside a propagation loop because of a store error"
    )
    .unwrap();

    pub static ref QUIZ_RESULTS_RECORDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_results_recorded_total",
        "Quiz results written into progress records",
        &["passed"]
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
