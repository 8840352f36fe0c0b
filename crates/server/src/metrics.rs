//! Prometheus metrics for observability.
//!
//! This module provides the server side metrics:
//! - HTTP request metrics (latency, counts)
//! - Engine status and journal counts (collected dynamically)
//!
//! Ticket pipeline counters live in `qrelease_core::metrics` and are
//! registered in the same registry.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "qrelease_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qrelease_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "qrelease_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Engine Metrics
// =============================================================================

/// Whether the poll loop is running.
pub static ENGINE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "qrelease_engine_running",
        "Whether the poll loop is running (1) or not (0)",
    )
    .unwrap()
});

/// Ticket pipelines currently running.
pub static TICKETS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "qrelease_tickets_in_flight",
        "Number of ticket pipelines currently running",
    )
    .unwrap()
});

/// Journal records by state (collected dynamically).
pub static JOURNAL_RECORDS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "qrelease_journal_records_by_state",
            "Progress journal records by workflow state",
        ),
        &["state"],
    )
    .unwrap()
});

/// Every workflow state, so that empty states report 0 instead of vanishing.
const JOURNAL_STATES: [&str; 9] = [
    "new",
    "inspecting",
    "skipped",
    "justified",
    "rejected",
    "releasing",
    "released",
    "updated",
    "failed",
];

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Engine
    registry
        .register(Box::new(ENGINE_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(TICKETS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(JOURNAL_RECORDS_BY_STATE.clone()))
        .unwrap();

    // Core metrics (poll cycles, pipelines, external services)
    for metric in qrelease_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current values
/// from the engine and the progress journal.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Some(engine) = state.engine() {
        let status = engine.status().await;
        ENGINE_RUNNING.set(if status.running { 1 } else { 0 });
        TICKETS_IN_FLIGHT.set(status.in_flight as i64);
    }

    if let Ok(counts) = state.progress_store().counts_by_state() {
        for state_type in JOURNAL_STATES {
            let count = counts.get(state_type).copied().unwrap_or(0);
            JOURNAL_RECORDS_BY_STATE
                .with_label_values(&[state_type])
                .set(count as i64);
        }
    }
}

/// Normalize a path for metric labels (replace ticket IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let ticket_regex = regex_lite::Regex::new(r"^(/api/v1/tickets/)[^/]+").unwrap();
    ticket_regex.replace(path, "${1}{id}").to_string()
}
