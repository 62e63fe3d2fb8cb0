//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job registry (creations, status transitions)
//! - Fallback resolver (mirror failures, transfer retries)
//! - Orchestrator (forced cancellations)
//! - Event broadcaster (events dropped for slow observers)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Registry Metrics
// =============================================================================

/// Jobs created since startup.
pub static JOBS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("streamgrab_jobs_created_total", "Total jobs created").unwrap()
});

/// Accepted job status transitions.
pub static JOB_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "streamgrab_job_transitions_total",
            "Job status transitions committed to the registry",
        ),
        &["from", "to"],
    )
    .unwrap()
});

// =============================================================================
// Resolver Metrics
// =============================================================================

/// Candidate attempts that failed, by stage and classification.
pub static CANDIDATE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "streamgrab_candidate_failures_total",
            "Mirror candidate failures",
        ),
        &["stage", "kind"], // stage: "capture" | "transfer", kind: "soft" | "hard"
    )
    .unwrap()
});

/// Transfer attempts retried on the same candidate.
pub static TRANSFER_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamgrab_transfer_retries_total",
        "Transfer soft failures retried on the same mirror",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator / Broadcaster Metrics
// =============================================================================

/// Cancellations committed after the grace period without adapter acknowledgement.
pub static FORCED_CANCELLATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamgrab_forced_cancellations_total",
        "Cancellations forced after the grace period elapsed",
    )
    .unwrap()
});

/// Events dropped because an observer's buffer overflowed.
pub static EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "streamgrab_events_dropped_total",
        "Job events dropped for lagging observers",
    )
    .unwrap()
});

/// All core metrics, for registration in the server's registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOB_TRANSITIONS.clone()),
        Box::new(CANDIDATE_FAILURES.clone()),
        Box::new(TRANSFER_RETRIES.clone()),
        Box::new(FORCED_CANCELLATIONS.clone()),
        Box::new(EVENTS_DROPPED.clone()),
    ]
}
