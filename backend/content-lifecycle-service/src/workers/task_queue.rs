use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{AppError, Result};
use crate::metrics::tasks as metrics;
use crate::services::{KeywordFlagEngine, ModerationRequest, ReactionRequest, ReactionToggleEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Moderate(ModerationRequest),
    ToggleReaction(ReactionRequest),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Moderate(_) => "moderate",
            Task::ToggleReaction(_) => "toggle_reaction",
        }
    }
}

#[derive(Debug)]
struct QueuedTask {
    task: Task,
    /// 1-based attempt number of the next execution.
    attempt: u32,
}

/// Exponential backoff between attempts, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before re-running a task whose attempt `attempt` (1-based) failed.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.backoff_ms.saturating_mul(2_u64.pow(exp));
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.retry_backoff_ms,
            max_backoff_ms: config.retry_max_backoff_ms,
        }
    }
}

/// Producer side of the bounded task channel.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<QueuedTask>,
}

/// Consumer side, handed to [`spawn_task_workers`].
pub struct TaskReceiver {
    rx: mpsc::Receiver<QueuedTask>,
}

impl TaskQueue {
    pub fn bounded(capacity: usize) -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, TaskReceiver { rx })
    }

    /// Enqueue, waiting for room when the queue is full.
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.tx
            .send(QueuedTask { task, attempt: 1 })
            .await
            .map_err(|e| AppError::Internal(format!("task queue closed, dropped {}", e.0.task.name())))
    }

    /// Enqueue without waiting; fails when the queue is full or closed.
    pub fn try_submit(&self, task: Task) -> Result<()> {
        self.tx
            .try_send(QueuedTask { task, attempt: 1 })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(q) => {
                    AppError::Internal(format!("task queue full, rejected {}", q.task.name()))
                }
                mpsc::error::TrySendError::Closed(q) => {
                    AppError::Internal(format!("task queue closed, dropped {}", q.task.name()))
                }
            })
    }
}

/// Engines the workers dispatch to.
#[derive(Clone)]
pub struct TaskHandlers {
    pub moderation: Arc<KeywordFlagEngine>,
    pub reactions: Arc<ReactionToggleEngine>,
}

impl TaskHandlers {
    async fn execute(&self, task: &Task) -> Result<()> {
        match task {
            Task::Moderate(request) => {
                // Never fails; failures inside are logged by the engine.
                self.moderation.moderate(request).await;
                Ok(())
            }
            Task::ToggleReaction(request) => self.reactions.toggle(request).await.map(|_| ()),
        }
    }
}

/// Spawn `config.workers` workers draining `receiver` until `shutdown` fires.
///
/// Retryable failures (lock timeouts, storage errors) are re-enqueued after
/// the policy's backoff; anything else, or a task out of attempts, is dropped
/// with an error log.
pub fn spawn_task_workers(
    receiver: TaskReceiver,
    queue: TaskQueue,
    handlers: TaskHandlers,
    config: &WorkerConfig,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(receiver.rx));
    let policy = RetryPolicy::from(config);
    let workers = config.workers.max(1);

    info!(
        workers,
        max_attempts = policy.max_attempts,
        backoff_ms = policy.backoff_ms,
        "Starting task workers"
    );

    (0..workers)
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let queue = queue.clone();
            let handlers = handlers.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(run_worker(worker_id, rx, queue, handlers, policy, shutdown))
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    queue: TaskQueue,
    handlers: TaskHandlers,
    policy: RetryPolicy,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let next = tokio::select! {
            next = async { rx.lock().await.recv().await } => next,
            _ = shutdown.recv() => {
                debug!(worker_id, "Task worker received shutdown signal");
                break;
            }
        };

        let Some(queued) = next else {
            debug!(worker_id, "Task queue closed");
            break;
        };

        process(worker_id, queued, &queue, &handlers, &policy).await;
    }

    debug!(worker_id, "Task worker stopped");
}

async fn process(
    worker_id: usize,
    queued: QueuedTask,
    queue: &TaskQueue,
    handlers: &TaskHandlers,
    policy: &RetryPolicy,
) {
    let name = queued.task.name();

    let err = match handlers.execute(&queued.task).await {
        Ok(()) => {
            metrics::record_completed(name);
            return;
        }
        Err(err) => err,
    };

    if !err.is_retryable() {
        metrics::record_dropped(name, "fatal");
        error!(
            worker_id,
            task = name,
            attempt = queued.attempt,
            error = %err,
            "Task failed with non-retryable error, dropping"
        );
        return;
    }

    if !policy.should_retry(queued.attempt) {
        metrics::record_dropped(name, "exhausted");
        error!(
            worker_id,
            task = name,
            attempts = queued.attempt,
            error = %err,
            "Task out of attempts, dropping"
        );
        return;
    }

    let delay = policy.backoff_after(queued.attempt);
    metrics::record_retry(name);
    warn!(
        worker_id,
        task = name,
        attempt = queued.attempt,
        backoff_ms = delay.as_millis() as u64,
        error = %err,
        "Task failed, scheduling retry"
    );

    let retry = QueuedTask {
        task: queued.task,
        attempt: queued.attempt + 1,
    };
    let tx = queue.tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = tx.send(retry).await {
            metrics::record_dropped(e.0.task.name(), "closed");
            warn!(task = e.0.task.name(), "Task queue closed before retry, dropping");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_after(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_after(60), Duration::from_millis(1_000));
    }

    #[test]
    fn retries_stop_at_max_attempts() {
        let policy = RetryPolicy::from(&WorkerConfig {
            max_attempts: 3,
            ..WorkerConfig::default()
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn full_queue_rejects_without_waiting() {
        let (queue, _rx) = TaskQueue::bounded(1);
        let request = ModerationRequest {
            target: crate::models::TargetRef::post(uuid::Uuid::new_v4()),
            text: "hello".to_string(),
            actor_id: None,
        };
        queue.try_submit(Task::Moderate(request.clone())).unwrap();
        assert!(queue.try_submit(Task::Moderate(request)).is_err());
    }
}
