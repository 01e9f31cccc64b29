use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::ContentStore;
use crate::error::Result;
use crate::metrics::moderation as metrics;
use crate::models::{Actor, ModeratedContent, ModerationStatus, TargetRef};

/// Final disposition requested for Pending content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(&self) -> ModerationStatus {
        match self {
            Decision::Approve => ModerationStatus::Approved,
            Decision::Reject => ModerationStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: ModerationStatus,
        to: ModerationStatus,
    },
    /// Already terminal; repeats are a successful no-op.
    Unchanged { current: ModerationStatus },
}

/// Pending -> Approved | Rejected. Both terminal.
///
/// Constructed in Pending; `restore` rebuilds one from a stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationLifecycle {
    status: ModerationStatus,
    is_flagged: bool,
    moderated_at: Option<DateTime<Utc>>,
    moderated_by: Option<Actor>,
}

impl Default for ModerationLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModerationLifecycle {
    pub fn new() -> Self {
        Self {
            status: ModerationStatus::Pending,
            is_flagged: false,
            moderated_at: None,
            moderated_by: None,
        }
    }

    pub fn restore(content: &ModeratedContent) -> Self {
        Self {
            status: content.status,
            is_flagged: content.is_flagged,
            moderated_at: content.moderated_at,
            moderated_by: content.moderated_by.map(Actor::from_id),
        }
    }

    pub fn status(&self) -> ModerationStatus {
        self.status
    }

    pub fn is_flagged(&self) -> bool {
        self.is_flagged
    }

    pub fn moderated_at(&self) -> Option<DateTime<Utc>> {
        self.moderated_at
    }

    pub fn moderated_by(&self) -> Option<Actor> {
        self.moderated_by
    }

    /// The flag bit only moves while Pending. Returns whether it was written.
    pub fn set_flagged(&mut self, flagged: bool) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.is_flagged = flagged;
        true
    }

    pub fn approve(&mut self, actor: Actor, at: DateTime<Utc>) -> Transition {
        self.apply(Decision::Approve, actor, at)
    }

    pub fn reject(&mut self, actor: Actor, at: DateTime<Utc>) -> Transition {
        self.apply(Decision::Reject, actor, at)
    }

    pub fn apply(&mut self, decision: Decision, actor: Actor, at: DateTime<Utc>) -> Transition {
        if self.status.is_terminal() {
            return Transition::Unchanged {
                current: self.status,
            };
        }

        let from = self.status;
        self.status = decision.status();
        self.moderated_at = Some(at);
        self.moderated_by = Some(actor);
        Transition::Applied {
            from,
            to: self.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ModerationStatus),
    /// Someone got there first; carries the status they left.
    AlreadyResolved(ModerationStatus),
    NotFound,
}

/// Applies terminal decisions to stored content.
///
/// No locking: the store write is conditional on Pending, so duplicate or
/// racing requests collapse into one applied decision plus no-ops.
pub struct ModerationService {
    content: Arc<dyn ContentStore>,
}

impl ModerationService {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }

    pub async fn approve(&self, target: TargetRef, actor: Actor) -> Result<ResolveOutcome> {
        self.resolve(target, Decision::Approve, actor).await
    }

    pub async fn reject(&self, target: TargetRef, actor: Actor) -> Result<ResolveOutcome> {
        self.resolve(target, Decision::Reject, actor).await
    }

    pub async fn resolve(
        &self,
        target: TargetRef,
        decision: Decision,
        actor: Actor,
    ) -> Result<ResolveOutcome> {
        let Some(content) = self.content.find(target).await? else {
            warn!(
                target_kind = %target.kind,
                target_id = %target.id,
                "Content not found for moderation decision"
            );
            return Ok(ResolveOutcome::NotFound);
        };

        let now = Utc::now();
        let mut lifecycle = ModerationLifecycle::restore(&content);

        let to = match lifecycle.apply(decision, actor, now) {
            Transition::Unchanged { current } => {
                return Ok(ResolveOutcome::AlreadyResolved(current));
            }
            Transition::Applied { to, .. } => to,
        };

        if !self.content.resolve(target, to, actor.id(), now).await? {
            // Lost a race with another decision (or a delete).
            return self.current_outcome(target).await;
        }

        Ok(self.applied(target, to, actor))
    }

    /// Resolve Pending content from its flag bit as stored at write time:
    /// flagged is rejected, clean is approved.
    pub async fn resolve_by_flag(&self, target: TargetRef, actor: Actor) -> Result<ResolveOutcome> {
        match self
            .content
            .resolve_by_flag(target, actor.id(), Utc::now())
            .await?
        {
            Some(to) => Ok(self.applied(target, to, actor)),
            None => self.current_outcome(target).await,
        }
    }

    async fn current_outcome(&self, target: TargetRef) -> Result<ResolveOutcome> {
        Ok(match self.content.find(target).await? {
            Some(current) => ResolveOutcome::AlreadyResolved(current.status),
            None => ResolveOutcome::NotFound,
        })
    }

    fn applied(&self, target: TargetRef, to: ModerationStatus, actor: Actor) -> ResolveOutcome {
        let source = match actor {
            Actor::System => "sweep",
            Actor::User(_) => "manual",
        };
        metrics::record_decision(target.kind.as_str(), to.as_str(), source);

        info!(
            target_kind = %target.kind,
            target_id = %target.id,
            actor = %actor,
            outcome = %to,
            "Moderation decision applied"
        );

        ResolveOutcome::Resolved(to)
    }
}
