//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the streamgrab server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Scheduler status (collected dynamically)
//!
//! Core engine metrics (job transitions, mirror failures, retries) are
//! registered into the same registry.

use once_cell::sync::Lazy;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::error;

use streamgrab_core::JobStatus;

use crate::state::AppState;

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
            "streamgrab_http_request_duration_seconds",
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
        Opts::new("streamgrab_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamgrab_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamgrab_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamgrab_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by event type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("streamgrab_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// Events skipped because a WebSocket client fell behind.
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamgrab_ws_lag_events_total",
        "Events skipped for WebSocket clients that fell behind",
    )
    .unwrap()
});

// =============================================================================
// Scheduler Metrics (collected dynamically)
// =============================================================================

/// Scheduler running state (1 = running, 0 = stopped).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamgrab_scheduler_running",
        "Whether the scheduler is admitting jobs (1) or stopped (0)",
    )
    .unwrap()
});

/// Jobs holding a download slot.
pub static DOWNLOADS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamgrab_downloads_active",
        "Number of currently active downloads",
    )
    .unwrap()
});

/// Jobs waiting for a slot.
pub static DOWNLOADS_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "streamgrab_downloads_queued",
        "Number of downloads waiting for a slot",
    )
    .unwrap()
});

/// Jobs in the most recent history page, by status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "streamgrab_jobs_by_status",
            "Jobs in recent history by current status",
        ),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let server_metrics: Vec<Box<dyn Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        // WebSocket
        Box::new(WS_CONNECTIONS_ACTIVE.clone()),
        Box::new(WS_CONNECTIONS_TOTAL.clone()),
        Box::new(WS_MESSAGES_SENT.clone()),
        Box::new(WS_LAG_EVENTS.clone()),
        // Scheduler
        Box::new(SCHEDULER_RUNNING.clone()),
        Box::new(DOWNLOADS_ACTIVE.clone()),
        Box::new(DOWNLOADS_QUEUED.clone()),
        Box::new(JOBS_BY_STATUS.clone()),
    ];

    // Core metrics (registry, resolver, orchestrator, broadcaster)
    let core_metrics = streamgrab_core::metrics::all_metrics();

    for metric in server_metrics.into_iter().chain(core_metrics) {
        if let Err(e) = registry.register(metric) {
            error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the scheduler right now.
pub fn collect_dynamic_metrics(state: &AppState) {
    let scheduler = state.scheduler();

    match scheduler.status() {
        Ok(status) => {
            SCHEDULER_RUNNING.set(if status.running { 1 } else { 0 });
            DOWNLOADS_ACTIVE.set(status.active.len() as i64);
            DOWNLOADS_QUEUED.set(status.queued_count as i64);
        }
        Err(e) => error!("Failed to read scheduler status for metrics: {}", e),
    }

    match scheduler.list(streamgrab_core::job::DEFAULT_LIST_LIMIT) {
        Ok(jobs) => {
            for status in JobStatus::ALL {
                let count = jobs.iter().filter(|job| job.status == status).count();
                JOBS_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(count as i64);
            }
        }
        Err(e) => error!("Failed to list jobs for metrics: {}", e),
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
