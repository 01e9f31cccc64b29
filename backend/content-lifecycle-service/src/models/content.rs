use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::TargetRef;
use crate::error::AppError;

/// Persisted as the actor id for sweep-driven and other automated decisions.
pub const SYSTEM_ACTOR_ID: Uuid = Uuid::nil();

/// Moderation status stored in the `status` column (SMALLINT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_i16(&self) -> i16 {
        match self {
            ModerationStatus::Pending => 0,
            ModerationStatus::Approved => 1,
            ModerationStatus::Rejected => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ModerationStatus::Pending)
    }

    /// Sweep rule: flagged content is rejected, clean content approved.
    pub fn for_flag(is_flagged: bool) -> Self {
        if is_flagged {
            ModerationStatus::Rejected
        } else {
            ModerationStatus::Approved
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i16> for ModerationStatus {
    type Error = AppError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ModerationStatus::Pending),
            1 => Ok(ModerationStatus::Approved),
            2 => Ok(ModerationStatus::Rejected),
            other => Err(AppError::InvalidInput(format!(
                "unknown moderation status {}",
                other
            ))),
        }
    }
}

/// Who performed a moderation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    User(Uuid),
    System,
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Actor::User(id) => *id,
            Actor::System => SYSTEM_ACTOR_ID,
        }
    }

    pub fn from_id(id: Uuid) -> Self {
        if id == SYSTEM_ACTOR_ID {
            Actor::System
        } else {
            Actor::User(id)
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "{}", id),
            Actor::System => f.write_str("system"),
        }
    }
}

/// A moderatable row, whichever table it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedContent {
    pub target: TargetRef,
    pub owner_id: Uuid,
    pub text: String,
    pub status: ModerationStatus,
    pub is_flagged: bool,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderated_by: Option<Uuid>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModeratedContent {
    /// Fresh, unmoderated content as inserted by the creation flow.
    pub fn new(target: TargetRef, owner_id: Uuid, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            target,
            owner_id,
            text: text.into(),
            status: ModerationStatus::Pending,
            is_flagged: false,
            moderated_at: None,
            moderated_by: None,
            score: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// Who is asking for a listing; drives the visibility policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User(Uuid),
    /// Moderators and admins.
    Privileged,
}

impl Viewer {
    /// Approved content is public, owners see their own content in any state,
    /// privileged viewers see everything.
    pub fn can_see(&self, content: &ModeratedContent) -> bool {
        match self {
            Viewer::Privileged => true,
            Viewer::User(id) if *id == content.owner_id => true,
            Viewer::User(_) | Viewer::Anonymous => content.status == ModerationStatus::Approved,
        }
    }
}
