//! Shared fixtures for integration tests: in-memory stores, a lock that
//! records acquire/release order, a reaction store that slows down every
//! transaction and a content store with scripted interference.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use content_lifecycle_service::db::{ContentStore, InMemoryStore, ReactionStore, ReactionTx};
use content_lifecycle_service::models::{
    ModeratedContent, ModerationStatus, Reaction, ReactionKind, ReactionTally, TargetKind,
    TargetRef, Viewer,
};
use content_lifecycle_service::services::ReactionToggleEngine;
use content_lifecycle_service::{AppError, Result};
use redis_utils::{DistributedLock, InMemoryLock, LockError, LockOptions, LockToken};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn fast_lock_options() -> LockOptions {
    LockOptions {
        ttl: Duration::from_secs(5),
        max_wait: Duration::from_secs(2),
        retry_interval: Duration::from_millis(5),
    }
}

pub fn seed_post(store: &InMemoryStore, text: &str) -> ModeratedContent {
    let content = ModeratedContent::new(TargetRef::post(Uuid::new_v4()), Uuid::new_v4(), text);
    store.insert_content(content.clone());
    content
}

pub fn aged(content: ModeratedContent, days: i64) -> ModeratedContent {
    content.with_created_at(chrono::Utc::now() - chrono::Duration::days(days))
}

pub fn toggle_engine(store: &InMemoryStore, lock: Arc<dyn DistributedLock>) -> ReactionToggleEngine {
    ReactionToggleEngine::new(Arc::new(store.clone()), lock, fast_lock_options())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Acquired(String),
    Released(String),
}

/// Delegates to [`InMemoryLock`] and records every grant and release.
#[derive(Default)]
pub struct RecordingLock {
    inner: InMemoryLock,
    events: Mutex<Vec<LockEvent>>,
}

impl RecordingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DistributedLock for RecordingLock {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<Option<LockToken>, LockError> {
        let token = self.inner.try_acquire(key, ttl).await?;
        if token.is_some() {
            self.events
                .lock()
                .unwrap()
                .push(LockEvent::Acquired(key.to_string()));
        }
        Ok(token)
    }

    async fn release(&self, token: &LockToken) -> std::result::Result<bool, LockError> {
        // Record before delegating so a waiter cannot log its grant first.
        self.events
            .lock()
            .unwrap()
            .push(LockEvent::Released(token.key().to_string()));
        self.inner.release(token).await
    }
}

/// Hands out transactions that pause between the tally and the score write,
/// the window in which two unsynchronized toggles would lose an update.
pub struct SlowReactionStore {
    inner: InMemoryStore,
    delay: Duration,
}

impl SlowReactionStore {
    pub fn new(inner: InMemoryStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ReactionStore for SlowReactionStore {
    async fn begin(&self) -> Result<Box<dyn ReactionTx>> {
        Ok(Box::new(SlowReactionTx {
            inner: self.inner.begin().await?,
            delay: self.delay,
        }))
    }

    async fn tally(&self, target: TargetRef) -> Result<ReactionTally> {
        ReactionStore::tally(&self.inner, target).await
    }

    async fn find_reaction(&self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        self.inner.find_reaction(target, actor_id).await
    }
}

struct SlowReactionTx {
    inner: Box<dyn ReactionTx>,
    delay: Duration,
}

#[async_trait]
impl ReactionTx for SlowReactionTx {
    async fn lock_target(&mut self, target: TargetRef) -> Result<bool> {
        self.inner.lock_target(target).await
    }

    async fn find(&mut self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        self.inner.find(target, actor_id).await
    }

    async fn insert(
        &mut self,
        target: TargetRef,
        actor_id: Uuid,
        kind: ReactionKind,
    ) -> Result<Reaction> {
        self.inner.insert(target, actor_id, kind).await
    }

    async fn update_kind(&mut self, reaction_id: Uuid, kind: ReactionKind) -> Result<()> {
        self.inner.update_kind(reaction_id, kind).await
    }

    async fn delete(&mut self, reaction_id: Uuid) -> Result<()> {
        self.inner.delete(reaction_id).await
    }

    async fn tally(&mut self, target: TargetRef) -> Result<ReactionTally> {
        let tally = self.inner.tally(target).await?;
        tokio::time::sleep(self.delay).await;
        Ok(tally)
    }

    async fn write_score(&mut self, target: TargetRef, score: i64) -> Result<()> {
        self.inner.write_score(target, score).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }
}

/// Delegates to [`InMemoryStore`], flagging chosen rows right after they are
/// listed and failing resolution of others.
pub struct ScriptedContentStore {
    inner: InMemoryStore,
    flag_after_listing: Mutex<Vec<TargetRef>>,
    failing: Mutex<HashSet<TargetRef>>,
}

impl ScriptedContentStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            flag_after_listing: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Flag `target` once the next listing has been returned, as a
    /// re-moderation racing the sweep would.
    pub fn flag_after_listing(&self, target: TargetRef) {
        self.flag_after_listing.lock().unwrap().push(target);
    }

    pub fn fail_resolves_of(&self, target: TargetRef) {
        self.failing.lock().unwrap().insert(target);
    }

    pub fn heal(&self, target: TargetRef) {
        self.failing.lock().unwrap().remove(&target);
    }

    fn is_failing(&self, target: TargetRef) -> bool {
        self.failing.lock().unwrap().contains(&target)
    }
}

#[async_trait]
impl ContentStore for ScriptedContentStore {
    async fn find(&self, target: TargetRef) -> Result<Option<ModeratedContent>> {
        self.inner.find(target).await
    }

    async fn mark_pending(&self, target: TargetRef) -> Result<bool> {
        self.inner.mark_pending(target).await
    }

    async fn set_flagged(&self, target: TargetRef, flagged: bool) -> Result<bool> {
        self.inner.set_flagged(target, flagged).await
    }

    async fn resolve(
        &self,
        target: TargetRef,
        status: ModerationStatus,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.is_failing(target) {
            return Err(AppError::Storage(format!("resolve failed for {}", target)));
        }
        self.inner
            .resolve(target, status, moderated_by, moderated_at)
            .await
    }

    async fn resolve_by_flag(
        &self,
        target: TargetRef,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<Option<ModerationStatus>> {
        if self.is_failing(target) {
            return Err(AppError::Storage(format!("resolve failed for {}", target)));
        }
        self.inner
            .resolve_by_flag(target, moderated_by, moderated_at)
            .await
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModeratedContent>> {
        let listed = self.inner.list_pending_created_before(cutoff, limit).await?;
        let to_flag: Vec<TargetRef> = self.flag_after_listing.lock().unwrap().drain(..).collect();
        for target in to_flag {
            self.inner.set_flagged(target, true).await?;
        }
        Ok(listed)
    }

    async fn list_visible(
        &self,
        kind: TargetKind,
        viewer: Viewer,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModeratedContent>> {
        self.inner.list_visible(kind, viewer, limit, offset).await
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
