//! Integration Tests: Deferred Task Workers
//!
//! Coverage:
//! - moderation and reaction tasks run off the submitting task
//! - lock timeouts are retried until the lock frees up
//! - workers stop on shutdown

mod common;

use common::{eventually, seed_post};
use content_lifecycle_service::config::WorkerConfig;
use content_lifecycle_service::db::InMemoryStore;
use content_lifecycle_service::models::{ModerationStatus, ReactionKind};
use content_lifecycle_service::services::{
    reaction_lock_key, KeywordFlagEngine, KeywordMatcher, ModerationRequest, ReactionRequest,
    ReactionToggleEngine,
};
use content_lifecycle_service::workers::{spawn_task_workers, Task, TaskHandlers, TaskQueue};
use redis_utils::{DistributedLock, InMemoryLock, LockOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        workers: 2,
        queue_capacity: 16,
        max_attempts: 10,
        retry_backoff_ms: 10,
        retry_max_backoff_ms: 50,
    }
}

fn handlers(store: &InMemoryStore, lock: Arc<InMemoryLock>) -> TaskHandlers {
    TaskHandlers {
        moderation: Arc::new(KeywordFlagEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            KeywordMatcher::new(["kill"]),
        )),
        reactions: Arc::new(ReactionToggleEngine::new(
            Arc::new(store.clone()),
            lock,
            LockOptions {
                ttl: Duration::from_secs(5),
                max_wait: Duration::from_millis(20),
                retry_interval: Duration::from_millis(5),
            },
        )),
    }
}

#[tokio::test]
async fn workers_run_submitted_tasks() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "I will kill them");
    let lock = Arc::new(InMemoryLock::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let (queue, receiver) = TaskQueue::bounded(16);
    let workers = spawn_task_workers(
        receiver,
        queue.clone(),
        handlers(&store, lock),
        &worker_config(),
        &shutdown_tx,
    );

    queue
        .submit(Task::Moderate(ModerationRequest {
            target: post.target,
            text: post.text.clone(),
            actor_id: None,
        }))
        .await
        .unwrap();
    queue
        .submit(Task::ToggleReaction(ReactionRequest {
            actor_id: Uuid::new_v4(),
            target: post.target,
            kind: ReactionKind::Like,
        }))
        .await
        .unwrap();

    assert!(
        eventually(Duration::from_secs(2), || {
            store
                .content(post.target)
                .map(|c| c.is_flagged && c.score == 1)
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(
        store.content(post.target).unwrap().status,
        ModerationStatus::Pending
    );
    assert_eq!(store.flag_records().len(), 1);

    shutdown_tx.send(()).unwrap();
    for worker in workers {
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn lock_timeouts_are_retried() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "hello");
    let lock = Arc::new(InMemoryLock::new());
    let actor = Uuid::new_v4();
    let (shutdown_tx, _) = broadcast::channel(1);

    // Someone else holds this actor's lock for a while.
    let held = lock
        .try_acquire(&reaction_lock_key(post.target, actor), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let (queue, receiver) = TaskQueue::bounded(16);
    let _workers = spawn_task_workers(
        receiver,
        queue.clone(),
        handlers(&store, lock.clone()),
        &worker_config(),
        &shutdown_tx,
    );

    queue
        .try_submit(Task::ToggleReaction(ReactionRequest {
            actor_id: actor,
            target: post.target,
            kind: ReactionKind::Dislike,
        }))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.content(post.target).unwrap().score, 0);

    assert!(lock.release(&held).await.unwrap());

    assert!(
        eventually(Duration::from_secs(2), || {
            store
                .content(post.target)
                .map(|c| c.score == -1)
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(store.reactions_by(post.target, actor).len(), 1);

    let _ = shutdown_tx.send(());
}
