//! Reaction toggle and lock metrics

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::time::Duration;

/// Toggles by target kind and action (created/switched/removed/target_missing)
static TOGGLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reaction_toggles_total",
        "Reaction toggles committed, by target kind and action",
        &["target_kind", "action"]
    )
    .expect("failed to register reaction_toggles_total")
});

static TOGGLE_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "reaction_toggle_failures_total",
        "Reaction toggles that aborted, by target kind",
        &["target_kind"]
    )
    .expect("failed to register reaction_toggle_failures_total")
});

/// Time spent holding the per-actor lock, from grant to release
static LOCK_HELD_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "reaction_lock_held_seconds",
        "Time from reaction lock acquisition to release",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("failed to register reaction_lock_held_seconds")
});

static LOCK_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "reaction_lock_timeouts_total",
        "Reaction lock acquisitions that exceeded max wait"
    )
    .expect("failed to register reaction_lock_timeouts_total")
});

pub fn record_toggle(target_kind: &str, action: &str) {
    TOGGLES_TOTAL.with_label_values(&[target_kind, action]).inc();
}

pub fn record_toggle_failure(target_kind: &str) {
    TOGGLE_FAILURES_TOTAL.with_label_values(&[target_kind]).inc();
}

pub fn record_lock_held(duration: Duration) {
    LOCK_HELD_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_lock_timeout() {
    LOCK_TIMEOUTS_TOTAL.inc();
}
