//! Keyword flagging, moderation decisions and sweep metrics

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::time::Duration;

/// Terminal moderation decisions by target kind, outcome and source (manual/sweep)
static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "moderation_decisions_total",
        "Moderation decisions applied, by target kind, outcome and source",
        &["target_kind", "outcome", "source"]
    )
    .expect("failed to register moderation_decisions_total")
});

/// Content flagged by the keyword filter
static KEYWORD_FLAGS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "moderation_keyword_flags_total",
        "Content items flagged for a banned keyword",
        &["target_kind"]
    )
    .expect("failed to register moderation_keyword_flags_total")
});

static FLAG_PERSIST_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "moderation_flag_persist_failures_total",
        "Flag record writes that failed and were skipped"
    )
    .expect("failed to register moderation_flag_persist_failures_total")
});

/// Sweep cycles (success/error)
static SWEEP_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "moderation_sweep_runs_total",
        "Moderation sweep cycles (success/error)",
        &["status"]
    )
    .expect("failed to register moderation_sweep_runs_total")
});

static SWEEP_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "moderation_sweep_duration_seconds",
        "Duration of one moderation sweep cycle",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register moderation_sweep_duration_seconds")
});

/// Items seen by the sweep, by result (approved/rejected/failed/deferred)
static SWEEP_ITEMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "moderation_sweep_items_total",
        "Pending items examined by the sweep, by result",
        &["result"]
    )
    .expect("failed to register moderation_sweep_items_total")
});

pub fn record_decision(target_kind: &str, outcome: &str, source: &str) {
    DECISIONS_TOTAL
        .with_label_values(&[target_kind, outcome, source])
        .inc();
}

pub fn record_keyword_flag(target_kind: &str) {
    KEYWORD_FLAGS_TOTAL.with_label_values(&[target_kind]).inc();
}

pub fn record_flag_persist_failure() {
    FLAG_PERSIST_FAILURES_TOTAL.inc();
}

pub fn record_sweep_run(status: &str, duration: Duration) {
    SWEEP_RUNS_TOTAL.with_label_values(&[status]).inc();
    SWEEP_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_sweep_items(result: &str, count: u64) {
    if count > 0 {
        SWEEP_ITEMS_TOTAL.with_label_values(&[result]).inc_by(count);
    }
}
