//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Workflow engine (poll cycles, ticket outcomes, retries, stage durations)
//! - Release gateway calls and status queries
//! - Failure notifications
//! - External services (ticketing system, gateway, SMTP relay)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Engine - Poll Metrics
// =============================================================================

/// Poll cycles total by result.
pub static POLL_CYCLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qrelease_poll_cycles_total", "Total ticket poll cycles"),
        &["result"], // "ok", "failed"
    )
    .unwrap()
});

/// Tickets returned by the ticket source.
pub static TICKETS_POLLED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "qrelease_tickets_polled_total",
        "Total tickets returned by the ticket source",
    )
    .unwrap()
});

// =============================================================================
// Engine - Ticket Metrics
// =============================================================================

/// Tickets that finished a pipeline run, by outcome.
pub static TICKETS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qrelease_tickets_processed_total",
            "Total tickets processed by final outcome",
        ),
        &["outcome"], // "released", "rejected", "skipped", "failed", "halted"
    )
    .unwrap()
});

/// Stage retries by stage.
pub static STAGE_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qrelease_stage_retries_total", "Total stage retry attempts"),
        &["stage"], // "polling", "inspecting", "releasing", "updating"
    )
    .unwrap()
});

/// Stage duration in seconds, including retries.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("qrelease_stage_duration_seconds", "Duration of pipeline stages")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["stage"],
    )
    .unwrap()
});

/// Justification decisions by result.
pub static JUSTIFICATION_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qrelease_justification_decisions_total",
            "Total justification policy decisions",
        ),
        &["result"], // "accepted", "rejected"
    )
    .unwrap()
});

// =============================================================================
// Release Gateway Metrics
// =============================================================================

/// Release calls by result.
pub static RELEASE_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qrelease_release_calls_total", "Total release gateway calls"),
        &["result"], // "success", "rejected", "unavailable", "ambiguous"
    )
    .unwrap()
});

/// Release status queries by reported status.
pub static RELEASE_STATUS_QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qrelease_release_status_queries_total",
            "Total release status queries after ambiguous failures",
        ),
        &["status"], // "released", "quarantined", "unknown", "error"
    )
    .unwrap()
});

// =============================================================================
// Notification Metrics
// =============================================================================

/// Failure notifications by result.
pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("qrelease_notifications_total", "Total failure notifications"),
        &["result"], // "sent", "failed"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "qrelease_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "qrelease_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one external service call.
pub fn observe_external(service: &str, operation: &str, seconds: f64, success: bool) {
    EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service, operation])
        .observe(seconds);
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, operation, if success { "success" } else { "error" }])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Polling
        Box::new(POLL_CYCLES.clone()),
        Box::new(TICKETS_POLLED.clone()),
        // Tickets
        Box::new(TICKETS_PROCESSED.clone()),
        Box::new(STAGE_RETRIES.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(JUSTIFICATION_DECISIONS.clone()),
        // Gateway
        Box::new(RELEASE_CALLS.clone()),
        Box::new(RELEASE_STATUS_QUERIES.clone()),
        // Notifications
        Box::new(NOTIFICATIONS.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
