//! Integration Tests: Reaction Toggle Engine
//!
//! Coverage:
//! - like / like again / dislike sequence and the persisted score
//! - at most one reaction row per (target, actor)
//! - score == likes - dislikes after every toggle, across actors, including
//!   concurrent toggles on one target
//! - rollback when the score write fails
//! - same-actor toggles serialize through the lock
//! - lock timeout leaves no state behind
//! - missing target is a no-op

mod common;

use common::{fast_lock_options, seed_post, toggle_engine, LockEvent, RecordingLock, SlowReactionStore};
use content_lifecycle_service::db::InMemoryStore;
use content_lifecycle_service::models::{ModeratedContent, ReactionKind, TargetRef};
use content_lifecycle_service::services::{
    reaction_lock_key, ReactionRequest, ReactionToggleEngine, ToggleAction,
};
use redis_utils::{DistributedLock, InMemoryLock, LockOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

fn request(actor_id: Uuid, target: TargetRef, kind: ReactionKind) -> ReactionRequest {
    ReactionRequest {
        actor_id,
        target,
        kind,
    }
}

#[tokio::test]
async fn like_like_dislike_sequence() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "a post").target;
    let engine = toggle_engine(&store, Arc::new(InMemoryLock::new()));
    let actor = Uuid::new_v4();

    let first = engine
        .toggle(&request(actor, post, ReactionKind::Like))
        .await
        .unwrap();
    assert_eq!(first.action, ToggleAction::Created);
    assert_eq!(store.content(post).unwrap().score, 1);

    let second = engine
        .toggle(&request(actor, post, ReactionKind::Like))
        .await
        .unwrap();
    assert_eq!(second.action, ToggleAction::Removed);
    assert!(store.reactions_by(post, actor).is_empty());
    assert_eq!(store.content(post).unwrap().score, 0);

    let third = engine
        .toggle(&request(actor, post, ReactionKind::Dislike))
        .await
        .unwrap();
    assert_eq!(third.action, ToggleAction::Created);
    let rows = store.reactions_by(post, actor);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, ReactionKind::Dislike);
    assert_eq!(store.content(post).unwrap().score, -1);
    assert_eq!(third.score, -1);
}

#[tokio::test]
async fn switching_replaces_instead_of_stacking() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "a post").target;
    let engine = toggle_engine(&store, Arc::new(InMemoryLock::new()));
    let actor = Uuid::new_v4();

    engine
        .toggle(&request(actor, post, ReactionKind::Dislike))
        .await
        .unwrap();
    let switched = engine
        .toggle(&request(actor, post, ReactionKind::Like))
        .await
        .unwrap();

    assert_eq!(
        switched.action,
        ToggleAction::Switched {
            from: ReactionKind::Dislike
        }
    );
    assert_eq!(switched.tally.likes, 1);
    assert_eq!(switched.tally.dislikes, 0);

    let current = engine.reaction_of(post, actor).await.unwrap().unwrap();
    assert_eq!(current.kind, ReactionKind::Like);
    assert_eq!(store.reactions_by(post, actor).len(), 1);
}

#[tokio::test]
async fn at_most_one_row_and_score_invariant_over_random_sequence() {
    let store = InMemoryStore::new();
    let reel = ModeratedContent::new(TargetRef::reel(Uuid::new_v4()), Uuid::new_v4(), "caption");
    let target = reel.target;
    store.insert_content(reel);
    let engine = toggle_engine(&store, Arc::new(InMemoryLock::new()));

    let actors: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let script = [1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 1];

    for (step, code) in script.iter().enumerate() {
        let actor = actors[step % actors.len()];
        let kind = ReactionKind::try_from(*code as i16).unwrap();
        engine.toggle(&request(actor, target, kind)).await.unwrap();

        for a in &actors {
            assert!(store.reactions_by(target, *a).len() <= 1);
        }
        let tally = engine.tally(target).await.unwrap();
        assert_eq!(store.content(target).unwrap().score, tally.likes - tally.dislikes);
    }
}

#[tokio::test]
async fn failed_score_write_rolls_back_whole_toggle() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "a post").target;
    let lock = Arc::new(InMemoryLock::new());
    let engine = toggle_engine(&store, lock.clone());
    let actor = Uuid::new_v4();

    engine
        .toggle(&request(actor, post, ReactionKind::Like))
        .await
        .unwrap();

    store.fail_next_score_write();
    let result = engine
        .toggle(&request(actor, post, ReactionKind::Dislike))
        .await;
    assert!(result.is_err());

    let rows = store.reactions_by(post, actor);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, ReactionKind::Like);
    assert_eq!(store.content(post).unwrap().score, 1);
    assert!(!lock.is_held(&reaction_lock_key(post, actor)));
}

#[tokio::test]
async fn lock_timeout_never_runs_the_toggle() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "a post").target;
    let lock = Arc::new(InMemoryLock::new());
    let actor = Uuid::new_v4();

    let key = reaction_lock_key(post, actor);
    let _held = lock
        .try_acquire(&key, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let engine = ReactionToggleEngine::new(
        Arc::new(store.clone()),
        lock.clone(),
        LockOptions {
            ttl: Duration::from_secs(5),
            max_wait: Duration::from_millis(50),
            retry_interval: Duration::from_millis(10),
        },
    );

    let err = engine
        .toggle(&request(actor, post, ReactionKind::Like))
        .await
        .unwrap_err();
    assert!(err.is_lock_timeout());
    assert!(err.is_retryable());
    assert!(store.reactions_by(post, actor).is_empty());
    assert_eq!(store.content(post).unwrap().score, 0);
}

#[tokio::test]
async fn missing_target_is_a_no_op() {
    let store = InMemoryStore::new();
    let engine = toggle_engine(&store, Arc::new(InMemoryLock::new()));
    let ghost = TargetRef::comment(Uuid::new_v4());
    let actor = Uuid::new_v4();

    let outcome = engine
        .toggle(&request(actor, ghost, ReactionKind::Like))
        .await
        .unwrap();
    assert_eq!(outcome.action, ToggleAction::TargetMissing);
    assert!(store.reactions_by(ghost, actor).is_empty());
}

#[tokio::test]
async fn concurrent_toggles_by_same_actor_serialize() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "a post").target;
    let lock = Arc::new(RecordingLock::new());
    let engine = Arc::new(ReactionToggleEngine::new(
        Arc::new(SlowReactionStore::new(
            store.clone(),
            Duration::from_millis(50),
        )),
        lock.clone(),
        fast_lock_options(),
    ));
    let actor = Uuid::new_v4();

    let like = request(actor, post, ReactionKind::Like);
    let (a, b) = tokio::join!(engine.toggle(&like), engine.toggle(&like));
    let (a, b) = (a.unwrap(), b.unwrap());

    // Whichever ran second saw the first one's row and took it back.
    let mut actions = vec![a.action, b.action];
    actions.sort_by_key(|action| action.as_str());
    assert_eq!(actions, vec![ToggleAction::Created, ToggleAction::Removed]);

    let key = reaction_lock_key(post, actor);
    assert_eq!(
        lock.events(),
        vec![
            LockEvent::Acquired(key.clone()),
            LockEvent::Released(key.clone()),
            LockEvent::Acquired(key.clone()),
            LockEvent::Released(key),
        ]
    );

    assert!(store.reactions_by(post, actor).is_empty());
    assert_eq!(store.content(post).unwrap().score, 0);
}

#[tokio::test]
async fn different_actors_on_one_target_keep_exact_score() {
    let store = InMemoryStore::new();
    let post = seed_post(&store, "popular").target;
    // Every transaction pauses between its tally and its score write; only
    // the target row lock keeps another actor's commit out of that gap.
    let engine = Arc::new(ReactionToggleEngine::new(
        Arc::new(SlowReactionStore::new(store.clone(), Duration::from_millis(5))),
        Arc::new(InMemoryLock::new()),
        fast_lock_options(),
    ));

    let mut tasks = JoinSet::new();
    for i in 0..12 {
        let engine = engine.clone();
        let kind = if i % 3 == 0 {
            ReactionKind::Dislike
        } else {
            ReactionKind::Like
        };
        tasks.spawn(async move {
            engine
                .toggle(&request(Uuid::new_v4(), post, kind))
                .await
                .map(|outcome| outcome.action)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        assert_eq!(joined.unwrap().unwrap(), ToggleAction::Created);
    }

    let tally = engine.tally(post).await.unwrap();
    assert_eq!(tally.likes, 8);
    assert_eq!(tally.dislikes, 4);
    assert_eq!(store.content(post).unwrap().score, 4);
}
