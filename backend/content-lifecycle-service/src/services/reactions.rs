use redis_utils::{with_lock_observed, DistributedLock, LockOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReactionConfig;
use crate::db::ReactionStore;
use crate::error::{AppError, Result};
use crate::metrics::reactions as metrics;
use crate::models::{Reaction, ReactionKind, ReactionTally, TargetRef};

/// A like/dislike submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub actor_id: Uuid,
    pub target: TargetRef,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Created,
    /// Existing reaction flipped to the requested kind.
    Switched { from: ReactionKind },
    /// Same kind submitted again: the reaction was taken back.
    Removed,
    /// Target vanished before the toggle ran; nothing was written.
    TargetMissing,
}

impl ToggleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleAction::Created => "created",
            ToggleAction::Switched { .. } => "switched",
            ToggleAction::Removed => "removed",
            ToggleAction::TargetMissing => "target_missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub action: ToggleAction,
    pub tally: ReactionTally,
    /// Score persisted on the target row (likes - dislikes).
    pub score: i64,
}

/// Lock key serializing one actor against themselves on one target.
pub fn reaction_lock_key(target: TargetRef, actor_id: Uuid) -> String {
    format!("reaction:{}:{}:{}", target.kind.as_str(), target.id, actor_id)
}

/// Toggle-style reactions with a synchronously recomputed target score.
pub struct ReactionToggleEngine {
    store: Arc<dyn ReactionStore>,
    lock: Arc<dyn DistributedLock>,
    lock_options: LockOptions,
}

impl ReactionToggleEngine {
    pub fn new(
        store: Arc<dyn ReactionStore>,
        lock: Arc<dyn DistributedLock>,
        lock_options: LockOptions,
    ) -> Self {
        Self {
            store,
            lock,
            lock_options,
        }
    }

    pub fn from_config(
        store: Arc<dyn ReactionStore>,
        lock: Arc<dyn DistributedLock>,
        config: &ReactionConfig,
    ) -> Self {
        Self::new(store, lock, config.lock_options())
    }

    /// Apply one toggle. Once this returns `Ok`, the target's stored score
    /// equals likes - dislikes over its committed reactions.
    ///
    /// Lock timeouts and storage failures are returned untouched; the whole
    /// toggle rolls back and retrying is up to the caller.
    pub async fn toggle(&self, request: &ReactionRequest) -> Result<ToggleOutcome> {
        let key = reaction_lock_key(request.target, request.actor_id);

        let result = with_lock_observed(
            self.lock.as_ref(),
            &key,
            &self.lock_options,
            metrics::record_lock_held,
            || self.toggle_in_tx(request),
        )
        .await;

        let kind_label = request.target.kind.as_str();
        match &result {
            Ok(outcome) => {
                metrics::record_toggle(kind_label, outcome.action.as_str());
            }
            Err(e) if e.is_lock_timeout() => {
                metrics::record_lock_timeout();
                warn!(
                    target_kind = %request.target.kind,
                    target_id = %request.target.id,
                    actor_id = %request.actor_id,
                    error = %e,
                    "Reaction lock not acquired in time"
                );
            }
            Err(e) => {
                metrics::record_toggle_failure(kind_label);
                warn!(
                    target_kind = %request.target.kind,
                    target_id = %request.target.id,
                    actor_id = %request.actor_id,
                    error = %e,
                    "Reaction toggle aborted"
                );
            }
        }

        result
    }

    async fn toggle_in_tx(&self, request: &ReactionRequest) -> Result<ToggleOutcome> {
        let ReactionRequest {
            actor_id,
            target,
            kind,
        } = *request;

        let mut tx = self.store.begin().await?;

        if !tx.lock_target(target).await? {
            warn!(
                target_kind = %target.kind,
                target_id = %target.id,
                actor_id = %actor_id,
                "Reaction target not found, ignoring toggle"
            );
            return Ok(ToggleOutcome {
                action: ToggleAction::TargetMissing,
                tally: ReactionTally::default(),
                score: 0,
            });
        }

        let action = match tx.find(target, actor_id).await? {
            Some(existing) if existing.kind == kind => {
                tx.delete(existing.id).await?;
                ToggleAction::Removed
            }
            Some(existing) => {
                tx.update_kind(existing.id, kind).await?;
                ToggleAction::Switched {
                    from: existing.kind,
                }
            }
            None => {
                tx.insert(target, actor_id, kind).await?;
                ToggleAction::Created
            }
        };

        let tally = tx.tally(target).await?;
        let score = tally.score();
        tx.write_score(target, score).await?;
        tx.commit().await?;

        info!(
            target_kind = %target.kind,
            target_id = %target.id,
            actor_id = %actor_id,
            reaction = %kind,
            action = action.as_str(),
            likes = tally.likes,
            dislikes = tally.dislikes,
            score,
            "Reaction toggled"
        );

        Ok(ToggleOutcome {
            action,
            tally,
            score,
        })
    }

    /// Committed like/dislike counts for `target`.
    pub async fn tally(&self, target: TargetRef) -> Result<ReactionTally> {
        self.store.tally(target).await
    }

    /// The actor's current reaction on `target`, if any.
    pub async fn reaction_of(&self, target: TargetRef, actor_id: Uuid) -> Result<Option<Reaction>> {
        let reaction = self.store.find_reaction(target, actor_id).await?;
        debug!(
            target_kind = %target.kind,
            target_id = %target.id,
            actor_id = %actor_id,
            found = reaction.is_some(),
            "Reaction lookup"
        );
        Ok(reaction)
    }
}

/// Map an inbound `(target, actor, type)` triple with a raw reaction code.
impl TryFrom<(TargetRef, Uuid, i32)> for ReactionRequest {
    type Error = AppError;

    fn try_from((target, actor_id, code): (TargetRef, Uuid, i32)) -> Result<Self> {
        Ok(ReactionRequest {
            actor_id,
            target,
            kind: ReactionKind::try_from(code)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_includes_kind_target_and_actor() {
        let target = TargetRef::comment_reply(Uuid::nil());
        let actor = Uuid::nil();
        assert_eq!(
            reaction_lock_key(target, actor),
            format!("reaction:comment_reply:{}:{}", Uuid::nil(), Uuid::nil())
        );
    }

    #[test]
    fn raw_reaction_codes_are_validated() {
        let target = TargetRef::post(Uuid::new_v4());
        let actor = Uuid::new_v4();
        let request = ReactionRequest::try_from((target, actor, 1)).unwrap();
        assert_eq!(request.kind, ReactionKind::Like);
        assert!(ReactionRequest::try_from((target, actor, 7)).is_err());
    }
}
