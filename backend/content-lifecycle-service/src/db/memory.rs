//! In-process implementation of every store trait.
//!
//! Used by the test suite and by single-node development runs. Reaction
//! transactions buffer their writes and apply them on commit, and
//! `lock_target` holds a per-target async mutex for the life of the
//! transaction, mirroring `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{ContentStore, FlagRecordStore, ReactionStore, ReactionTx};
use crate::error::{AppError, Result};
use crate::models::{
    FlagRecord, ModeratedContent, ModerationStatus, NewFlagRecord, Reaction, ReactionKind,
    ReactionTally, TargetKind, TargetRef, Viewer,
};

#[derive(Default)]
struct MemState {
    contents: HashMap<TargetRef, ModeratedContent>,
    flags: Vec<FlagRecord>,
    reactions: HashMap<Uuid, Reaction>,
}

impl MemState {
    fn reactions_for(&self, target: TargetRef) -> impl Iterator<Item = &Reaction> {
        self.reactions.values().filter(move |r| r.target == target)
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<MemState>,
    row_locks: DashMap<TargetRef, Arc<AsyncMutex<()>>>,
    fail_next_score_write: AtomicBool,
    fail_next_flag_append: AtomicBool,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a content row, as the creation flow would.
    pub fn insert_content(&self, content: ModeratedContent) {
        self.inner
            .state()
            .contents
            .insert(content.target, content);
    }

    pub fn remove_content(&self, target: TargetRef) -> Option<ModeratedContent> {
        self.inner.state().contents.remove(&target)
    }

    /// Committed snapshot of one content row.
    pub fn content(&self, target: TargetRef) -> Option<ModeratedContent> {
        self.inner.state().contents.get(&target).cloned()
    }

    /// Committed reaction rows for `(target, actor)`.
    pub fn reactions_by(&self, target: TargetRef, actor_id: Uuid) -> Vec<Reaction> {
        self.inner
            .state()
            .reactions_for(target)
            .filter(|r| r.actor_id == actor_id)
            .cloned()
            .collect()
    }

    pub fn flag_records(&self) -> Vec<FlagRecord> {
        self.inner.state().flags.clone()
    }

    /// Make the next `write_score` inside a reaction transaction fail.
    pub fn fail_next_score_write(&self) {
        self.inner.fail_next_score_write.store(true, Ordering::SeqCst);
    }

    /// Make the next flag record append fail.
    pub fn fail_next_flag_append(&self) {
        self.inner.fail_next_flag_append.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn find(&self, target: TargetRef) -> Result<Option<ModeratedContent>> {
        Ok(self.content(target))
    }

    async fn mark_pending(&self, target: TargetRef) -> Result<bool> {
        let mut state = self.inner.state();
        match state.contents.get_mut(&target) {
            Some(content) if content.moderated_at.is_none() => {
                content.status = ModerationStatus::Pending;
                content.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_flagged(&self, target: TargetRef, flagged: bool) -> Result<bool> {
        let mut state = self.inner.state();
        match state.contents.get_mut(&target) {
            Some(content) if content.status == ModerationStatus::Pending => {
                content.is_flagged = flagged;
                content.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve(
        &self,
        target: TargetRef,
        status: ModerationStatus,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.inner.state();
        match state.contents.get_mut(&target) {
            Some(content) if content.status == ModerationStatus::Pending => {
                content.status = status;
                content.moderated_at = Some(moderated_at);
                content.moderated_by = Some(moderated_by);
                content.updated_at = moderated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve_by_flag(
        &self,
        target: TargetRef,
        moderated_by: Uuid,
        moderated_at: DateTime<Utc>,
    ) -> Result<Option<ModerationStatus>> {
        let mut state = self.inner.state();
        match state.contents.get_mut(&target) {
            Some(content) if content.status == ModerationStatus::Pending => {
                let status = ModerationStatus::for_flag(content.is_flagged);
                content.status = status;
                content.moderated_at = Some(moderated_at);
                content.moderated_by = Some(moderated_by);
                content.updated_at = moderated_at;
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModeratedContent>> {
        let state = self.inner.state();
        let mut pending: Vec<ModeratedContent> = state
            .contents
            .values()
            .filter(|c| c.status == ModerationStatus::Pending && c.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_visible(
        &self,
        kind: TargetKind,
        viewer: Viewer,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModeratedContent>> {
        let state = self.inner.state();
        let mut visible: Vec<ModeratedContent> = state
            .contents
            .values()
            .filter(|c| c.target.kind == kind && viewer.can_see(c))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl FlagRecordStore for InMemoryStore {
    async fn append(&self, record: NewFlagRecord) -> Result<FlagRecord> {
        if self.inner.fail_next_flag_append.swap(false, Ordering::SeqCst) {
            return Err(AppError::Storage("flag record write failed".to_string()));
        }

        let saved = record.into_record(Uuid::new_v4(), Utc::now());
        self.inner.state().flags.push(saved.clone());
        Ok(saved)
    }

    async fn list_for_target(&self, target: TargetRef) -> Result<Vec<FlagRecord>> {
        let state = self.inner.state();
        Ok(state
            .flags
            .iter()
            .rev()
            .filter(|f| f.target == target)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<FlagRecord>> {
        let state = self.inner.state();
        Ok(state
            .flags
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReactionStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn ReactionTx>> {
        Ok(Box::new(InMemoryReactionTx {
            inner: Arc::clone(&self.inner),
            row_guards: Vec::new(),
            reactions: HashMap::new(),
            scores: HashMap::new(),
        }))
    }

    async fn tally(&self, target: TargetRef) -> Result<ReactionTally> {
        let state = self.inner.state();
        Ok(ReactionTally::from_kinds(
            state.reactions_for(target).map(|r| &r.kind),
        ))
    }

    async fn find_reaction(&self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        let state = self.inner.state();
        Ok(state
            .reactions_for(target)
            .filter(|r| r.actor_id == actor_id)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }
}

/// Held row lock. Dropping it releases the row and forgets the mutex once no
/// other transaction holds or waits on it.
struct RowLock {
    inner: Arc<Inner>,
    target: TargetRef,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the map is left.
        self.inner
            .row_locks
            .remove_if(&self.target, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct InMemoryReactionTx {
    inner: Arc<Inner>,
    row_guards: Vec<RowLock>,
    /// Pending reaction writes; `None` marks a delete.
    reactions: HashMap<Uuid, Option<Reaction>>,
    scores: HashMap<TargetRef, i64>,
}

impl InMemoryReactionTx {
    /// Committed rows for `target` with this transaction's writes layered on top.
    fn visible_reactions(&self, target: TargetRef) -> Vec<Reaction> {
        let state = self.inner.state();
        let mut rows: Vec<Reaction> = state
            .reactions_for(target)
            .filter(|r| !self.reactions.contains_key(&r.id))
            .cloned()
            .collect();
        rows.extend(
            self.reactions
                .values()
                .flatten()
                .filter(|r| r.target == target)
                .cloned(),
        );
        rows
    }

    fn staged_or_committed(&self, reaction_id: Uuid) -> Option<Reaction> {
        match self.reactions.get(&reaction_id) {
            Some(staged) => staged.clone(),
            None => self.inner.state().reactions.get(&reaction_id).cloned(),
        }
    }
}

#[async_trait]
impl ReactionTx for InMemoryReactionTx {
    async fn lock_target(&mut self, target: TargetRef) -> Result<bool> {
        let row_lock = Arc::clone(&self.inner.row_locks.entry(target).or_default());
        let guard = row_lock.lock_owned().await;
        self.row_guards.push(RowLock {
            inner: Arc::clone(&self.inner),
            target,
            guard: Some(guard),
        });

        Ok(self.inner.state().contents.contains_key(&target))
    }

    async fn find(&mut self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        Ok(self
            .visible_reactions(target)
            .into_iter()
            .filter(|r| r.actor_id == actor_id)
            .max_by_key(|r| r.updated_at))
    }

    async fn insert(
        &mut self,
        target: TargetRef,
        actor_id: Uuid,
        kind: ReactionKind,
    ) -> Result<Reaction> {
        let now = Utc::now();
        let reaction = Reaction {
            id: Uuid::new_v4(),
            target,
            kind,
            actor_id,
            created_at: now,
            updated_at: now,
        };
        self.reactions.insert(reaction.id, Some(reaction.clone()));
        Ok(reaction)
    }

    async fn update_kind(&mut self, reaction_id: Uuid, kind: ReactionKind) -> Result<()> {
        if let Some(mut reaction) = self.staged_or_committed(reaction_id) {
            reaction.kind = kind;
            reaction.updated_at = Utc::now();
            self.reactions.insert(reaction_id, Some(reaction));
        }
        Ok(())
    }

    async fn delete(&mut self, reaction_id: Uuid) -> Result<()> {
        self.reactions.insert(reaction_id, None);
        Ok(())
    }

    async fn tally(&mut self, target: TargetRef) -> Result<ReactionTally> {
        let rows = self.visible_reactions(target);
        Ok(ReactionTally::from_kinds(rows.iter().map(|r| &r.kind)))
    }

    async fn write_score(&mut self, target: TargetRef, score: i64) -> Result<()> {
        if self.inner.fail_next_score_write.swap(false, Ordering::SeqCst) {
            return Err(AppError::Storage(format!(
                "score write failed for {}",
                target
            )));
        }

        self.scores.insert(target, score);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryReactionTx {
            inner,
            row_guards,
            reactions,
            scores,
        } = *self;

        let mut state = inner.state();
        for (id, staged) in reactions {
            match staged {
                Some(reaction) => {
                    state.reactions.insert(id, reaction);
                }
                None => {
                    state.reactions.remove(&id);
                }
            }
        }

        let now = Utc::now();
        for (target, score) in scores {
            if let Some(content) = state.contents.get_mut(&target) {
                content.score = score;
                content.updated_at = now;
            }
        }

        drop(state);
        drop(row_guards);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (InMemoryStore, TargetRef) {
        let store = InMemoryStore::new();
        let target = TargetRef::post(Uuid::new_v4());
        store.insert_content(ModeratedContent::new(target, Uuid::new_v4(), "hello"));
        (store, target)
    }

    #[tokio::test]
    async fn uncommitted_reaction_writes_are_discarded() {
        let (store, target) = seeded();
        let actor = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_target(target).await.unwrap());
        tx.insert(target, actor, ReactionKind::Like).await.unwrap();
        assert_eq!(tx.tally(target).await.unwrap().likes, 1);
        tx.write_score(target, 1).await.unwrap();
        drop(tx);

        assert!(store.reactions_by(target, actor).is_empty());
        assert_eq!(store.content(target).unwrap().score, 0);
    }

    #[tokio::test]
    async fn commit_applies_reaction_and_score() {
        let (store, target) = seeded();
        let actor = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.lock_target(target).await.unwrap();
        tx.insert(target, actor, ReactionKind::Dislike).await.unwrap();
        let tally = tx.tally(target).await.unwrap();
        tx.write_score(target, tally.score()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.reactions_by(target, actor).len(), 1);
        assert_eq!(store.content(target).unwrap().score, -1);
        assert_eq!(ReactionStore::tally(&store, target).await.unwrap().dislikes, 1);
    }

    #[tokio::test]
    async fn row_locks_are_forgotten_once_released() {
        let (store, target) = seeded();

        let mut committed = store.begin().await.unwrap();
        committed.lock_target(target).await.unwrap();
        assert_eq!(store.inner.row_locks.len(), 1);
        committed.commit().await.unwrap();
        assert!(store.inner.row_locks.is_empty());

        let mut rolled_back = store.begin().await.unwrap();
        rolled_back.lock_target(target).await.unwrap();
        drop(rolled_back);
        assert!(store.inner.row_locks.is_empty());
    }

    #[tokio::test]
    async fn row_lock_survives_while_a_waiter_queues() {
        let (store, target) = seeded();

        let mut first = store.begin().await.unwrap();
        first.lock_target(target).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_target(target).await.unwrap();
                second.commit().await.unwrap();
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        first.commit().await.unwrap();
        waiter.await.unwrap();
        assert!(store.inner.row_locks.is_empty());
    }

    #[tokio::test]
    async fn lock_target_reports_missing_rows() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(!tx.lock_target(TargetRef::reel(Uuid::new_v4())).await.unwrap());
    }

    #[tokio::test]
    async fn resolve_only_applies_to_pending_rows() {
        let (store, target) = seeded();
        let moderator = Uuid::new_v4();

        assert!(store
            .resolve(target, ModerationStatus::Rejected, moderator, Utc::now())
            .await
            .unwrap());
        assert!(!store
            .resolve(target, ModerationStatus::Approved, moderator, Utc::now())
            .await
            .unwrap());
        assert!(!store.mark_pending(target).await.unwrap());
        assert!(!store.set_flagged(target, true).await.unwrap());

        let content = store.content(target).unwrap();
        assert_eq!(content.status, ModerationStatus::Rejected);
        assert_eq!(content.moderated_by, Some(moderator));
    }

    #[tokio::test]
    async fn flag_append_failure_is_one_shot() {
        let (store, target) = seeded();
        store.fail_next_flag_append();

        let record = NewFlagRecord::keyword_violation(target, "spam", Uuid::nil());
        assert!(store.append(record.clone()).await.is_err());
        store.append(record).await.unwrap();
        assert_eq!(store.list_for_target(target).await.unwrap().len(), 1);
    }
}
