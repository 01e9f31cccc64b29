use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Kinds of user content that can be moderated and reacted to.
///
/// The numeric discriminator is persisted (`target_type` columns) and must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Post,
    Comment,
    CommentReply,
    Reel,
}

impl TargetKind {
    pub const ALL: [TargetKind; 4] = [
        TargetKind::Post,
        TargetKind::Comment,
        TargetKind::CommentReply,
        TargetKind::Reel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Comment => "comment",
            TargetKind::CommentReply => "comment_reply",
            TargetKind::Reel => "reel",
        }
    }

    pub fn discriminator(&self) -> i16 {
        match self {
            TargetKind::Post => 1,
            TargetKind::Comment => 2,
            TargetKind::CommentReply => 3,
            TargetKind::Reel => 4,
        }
    }

    /// Table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            TargetKind::Post => "posts",
            TargetKind::Comment => "comments",
            TargetKind::CommentReply => "comment_replies",
            TargetKind::Reel => "reels",
        }
    }

    /// Column carrying the user-authored text checked by moderation.
    pub fn text_field(&self) -> &'static str {
        match self {
            TargetKind::Post | TargetKind::Comment | TargetKind::CommentReply => "content",
            TargetKind::Reel => "caption",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i16> for TargetKind {
    type Error = AppError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TargetKind::Post),
            2 => Ok(TargetKind::Comment),
            3 => Ok(TargetKind::CommentReply),
            4 => Ok(TargetKind::Reel),
            other => Err(AppError::InvalidInput(format!(
                "unknown target type discriminator {}",
                other
            ))),
        }
    }
}

impl FromStr for TargetKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown target type '{}'", s)))
    }
}

/// Address of a single moderatable / reactable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: Uuid,
}

impl TargetRef {
    pub fn new(kind: TargetKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn post(id: Uuid) -> Self {
        Self::new(TargetKind::Post, id)
    }

    pub fn comment(id: Uuid) -> Self {
        Self::new(TargetKind::Comment, id)
    }

    pub fn comment_reply(id: Uuid) -> Self {
        Self::new(TargetKind::CommentReply, id)
    }

    pub fn reel(id: Uuid) -> Self {
        Self::new(TargetKind::Reel, id)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
