use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::TargetRef;
use crate::error::AppError;

/// Reaction type stored in `reactions.reaction_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Dislike,
    Like,
}

impl ReactionKind {
    pub fn as_i16(&self) -> i16 {
        match self {
            ReactionKind::Dislike => 0,
            ReactionKind::Like => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Dislike => "dislike",
            ReactionKind::Like => "like",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i16> for ReactionKind {
    type Error = AppError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReactionKind::Dislike),
            1 => Ok(ReactionKind::Like),
            other => Err(AppError::InvalidInput(format!(
                "reaction type must be 0 (dislike) or 1 (like), got {}",
                other
            ))),
        }
    }
}

impl TryFrom<i32> for ReactionKind {
    type Error = AppError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        i16::try_from(value)
            .map_err(|_| {
                AppError::InvalidInput(format!("reaction type out of range: {}", value))
            })
            .and_then(ReactionKind::try_from)
    }
}

/// One actor's reaction to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub target: TargetRef,
    pub kind: ReactionKind,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Like/dislike counts over a target's full reaction set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub likes: i64,
    pub dislikes: i64,
}

impl ReactionTally {
    pub fn score(&self) -> i64 {
        self.likes - self.dislikes
    }

    pub fn from_kinds<'a>(kinds: impl IntoIterator<Item = &'a ReactionKind>) -> Self {
        kinds
            .into_iter()
            .fold(ReactionTally::default(), |mut tally, kind| {
                match kind {
                    ReactionKind::Like => tally.likes += 1,
                    ReactionKind::Dislike => tally.dislikes += 1,
                }
                tally
            })
    }
}
