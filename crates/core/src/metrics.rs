//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Search routing (searches, per-source queries, candidates)
//! - Grabs and download-queue polling
//! - Imports and request status changes
//! - Scheduled task runs

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Search
// =============================================================================

/// Routed searches by routing mode.
pub static SEARCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_searches_total", "Total routed searches"),
        &["mode"], // "aggregator", "direct"
    )
    .unwrap()
});

/// Per-source query attempts by result.
pub static SOURCE_QUERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_source_queries_total",
            "Total queries sent to individual release sources",
        ),
        &["source", "result"], // "ok", "error", "timeout", "rate_limited"
    )
    .unwrap()
});

/// Search duration in seconds.
pub static SEARCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvester_search_duration_seconds",
            "Duration of routed searches",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["mode"],
    )
    .unwrap()
});

/// Deduplicated candidates per search.
pub static SEARCH_CANDIDATES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvester_search_candidates",
            "Number of deduplicated candidates per search",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Grabs and queue
// =============================================================================

/// Grab attempts by result.
pub static GRABS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_grabs_total", "Total grab attempts"),
        &["result"], // "submitted", "conflict", "failed"
    )
    .unwrap()
});

/// Queue polls by client and result.
pub static QUEUE_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_queue_polls_total",
            "Total download client queue polls",
        ),
        &["client", "result"], // "ok", "error", "timeout"
    )
    .unwrap()
});

/// Items currently in each client's queue by status.
pub static QUEUE_ITEMS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("harvester_queue_items", "Download queue items by status"),
        &["client", "status"],
    )
    .unwrap()
});

// =============================================================================
// Import and status
// =============================================================================

/// Import decisions by kind.
pub static IMPORT_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_import_decisions_total", "Total import decisions"),
        &["decision"], // "new", "upgrade", "reject_lower_quality", "reject_duplicate"
    )
    .unwrap()
});

/// Import attempts that failed and will be retried.
pub static IMPORT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_import_failures_total",
            "Total import evaluation failures",
        ),
        &["stage"], // "locate", "probe", "transfer", "library", "config"
    )
    .unwrap()
});

/// Request status transitions by new status.
pub static REQUEST_STATUS_CHANGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_request_status_changes_total",
            "Total request status transitions",
        ),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Scheduler
// =============================================================================

/// Scheduled task runs by task and result.
pub static TASK_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_task_runs_total", "Total scheduled task runs"),
        &["task", "result"], // "ok", "error", "skipped"
    )
    .unwrap()
});

/// Task run duration in seconds.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvester_task_duration_seconds",
            "Duration of scheduled task runs",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["task"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Search
        Box::new(SEARCHES_TOTAL.clone()),
        Box::new(SOURCE_QUERIES.clone()),
        Box::new(SEARCH_DURATION.clone()),
        Box::new(SEARCH_CANDIDATES.clone()),
        // Grabs and queue
        Box::new(GRABS_TOTAL.clone()),
        Box::new(QUEUE_POLLS.clone()),
        Box::new(QUEUE_ITEMS.clone()),
        // Import and status
        Box::new(IMPORT_DECISIONS.clone()),
        Box::new(IMPORT_FAILURES.clone()),
        Box::new(REQUEST_STATUS_CHANGES.clone()),
        // Scheduler
        Box::new(TASK_RUNS.clone()),
        Box::new(TASK_DURATION.clone()),
    ]
}
