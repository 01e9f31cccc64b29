//! Deferred task execution metrics

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static TASKS_COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lifecycle_tasks_completed_total",
        "Deferred tasks that ran to completion, by task type",
        &["task"]
    )
    .expect("failed to register lifecycle_tasks_completed_total")
});

static TASK_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lifecycle_task_retries_total",
        "Deferred tasks re-enqueued after a retryable failure",
        &["task"]
    )
    .expect("failed to register lifecycle_task_retries_total")
});

/// Tasks given up on: attempts exhausted, non-retryable error or queue closed
static TASKS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "lifecycle_tasks_dropped_total",
        "Deferred tasks dropped, by task type and reason",
        &["task", "reason"]
    )
    .expect("failed to register lifecycle_tasks_dropped_total")
});

pub fn record_completed(task: &str) {
    TASKS_COMPLETED_TOTAL.with_label_values(&[task]).inc();
}

pub fn record_retry(task: &str) {
    TASK_RETRIES_TOTAL.with_label_values(&[task]).inc();
}

pub fn record_dropped(task: &str, reason: &str) {
    TASKS_DROPPED_TOTAL.with_label_values(&[task, reason]).inc();
}
