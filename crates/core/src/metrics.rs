//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduler (cycles, rule evaluations, debounce)
//! - Executor (dispatched actions by kind and outcome)
//! - Torrent client calls made by the engine

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Scheduler
// =============================================================================

/// Cycles run, by instance and result.
pub static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_cycles_total", "Total automation cycles"),
        &["instance", "result"], // "completed", "failed", "idle"
    )
    .unwrap()
});

/// Cycle duration in seconds.
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedwarden_cycle_duration_seconds",
            "Duration of one automation cycle",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["instance"],
    )
    .unwrap()
});

/// Rule evaluations, by instance and result.
pub static RULES_EVALUATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_rules_evaluated_total", "Total rule evaluations"),
        &["instance", "result"], // "applied", "no_match", "failed"
    )
    .unwrap()
});

/// Torrents skipped because a rule processed them recently.
pub static DEBOUNCE_SKIPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedwarden_debounce_skips_total",
            "Torrent evaluations skipped by the debounce window",
        ),
        &["instance"],
    )
    .unwrap()
});

/// Torrents seen in the last cycle.
pub static TORRENTS_MANAGED: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("seedwarden_torrents", "Torrents listed in the last cycle"),
        &["instance"],
    )
    .unwrap()
});

/// Last free-space reading.
pub static FREE_SPACE_BYTES: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("seedwarden_free_space_bytes", "Last free-space reading"),
        &["instance"],
    )
    .unwrap()
});

// =============================================================================
// Executor
// =============================================================================

/// Per-torrent action outcomes.
pub static ACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_actions_total", "Actions applied to torrents"),
        &["action", "outcome"],
    )
    .unwrap()
});

/// Actions skipped because the torrent already had the desired value.
pub static ACTIONS_NOOP: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedwarden_actions_noop_total",
            "Actions skipped as no-ops against the snapshot",
        ),
        &["action"],
    )
    .unwrap()
});

// =============================================================================
// Torrent client
// =============================================================================

/// Duration of client calls made by the engine.
pub static CLIENT_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedwarden_client_request_duration_seconds",
            "Duration of torrent client requests",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["operation", "result"],
    )
    .unwrap()
});

// =============================================================================
// Registry
// =============================================================================

pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduler
        Box::new(CYCLES_TOTAL.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(RULES_EVALUATED.clone()),
        Box::new(DEBOUNCE_SKIPS.clone()),
        Box::new(TORRENTS_MANAGED.clone()),
        Box::new(FREE_SPACE_BYTES.clone()),
        // Executor
        Box::new(ACTIONS_TOTAL.clone()),
        Box::new(ACTIONS_NOOP.clone()),
        // Torrent client
        Box::new(CLIENT_REQUEST_DURATION.clone()),
    ]
}
