use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TargetRef;

/// `flag_type` written by the keyword filter.
pub const KEYWORD_VIOLATION: &str = "keyword_violation";

/// Append-only record of a single moderation violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagRecord {
    pub id: Uuid,
    pub target: TargetRef,
    pub flag_type: String,
    /// Attribute of the target that triggered the flag (e.g. `content`, `caption`).
    pub flag_field: String,
    pub flag_reason: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFlagRecord {
    pub target: TargetRef,
    pub flag_type: String,
    pub flag_field: String,
    pub flag_reason: String,
    pub created_by: Uuid,
}

impl NewFlagRecord {
    pub fn keyword_violation(target: TargetRef, keyword: &str, created_by: Uuid) -> Self {
        Self {
            target,
            flag_type: KEYWORD_VIOLATION.to_string(),
            flag_field: target.kind.text_field().to_string(),
            flag_reason: format!("Contains banned keyword \"{}\"", keyword),
            created_by,
        }
    }

    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> FlagRecord {
        FlagRecord {
            id,
            target: self.target,
            flag_type: self.flag_type,
            flag_field: self.flag_field,
            flag_reason: self.flag_reason,
            created_by: self.created_by,
            created_at,
        }
    }
}
