use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ModerationConfig;
use crate::db::{ContentStore, FlagRecordStore};
use crate::metrics::moderation as metrics;
use crate::models::{NewFlagRecord, TargetRef, SYSTEM_ACTOR_ID};

/// Case-insensitive substring matcher over an ordered banned-keyword list.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    /// Blank entries are dropped; the rest are lower-cased and kept in order.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// First configured keyword contained in `text`, if any.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }

        let normalized = text.to_lowercase();
        self.keywords
            .iter()
            .find(|keyword| normalized.contains(keyword.as_str()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Post-creation (or post-edit) moderation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub target: TargetRef,
    pub text: String,
    /// Acting user, when the caller knows it.
    #[serde(default)]
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Flagged { keyword: String },
    Clean,
    /// Content was deleted before moderation ran.
    NotFound,
    /// Content already carries a terminal decision and was left untouched.
    AlreadyResolved,
}

/// Scans submitted text and maintains the flag bit on Pending content.
///
/// Never returns an error: the caller only ever acknowledges submission, and
/// the sweep resolves whatever state is left behind.
pub struct KeywordFlagEngine {
    content: Arc<dyn ContentStore>,
    flags: Arc<dyn FlagRecordStore>,
    matcher: KeywordMatcher,
}

impl KeywordFlagEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        flags: Arc<dyn FlagRecordStore>,
        matcher: KeywordMatcher,
    ) -> Self {
        Self {
            content,
            flags,
            matcher,
        }
    }

    pub fn from_config(
        content: Arc<dyn ContentStore>,
        flags: Arc<dyn FlagRecordStore>,
        config: &ModerationConfig,
    ) -> Self {
        Self::new(content, flags, KeywordMatcher::new(&config.banned_keywords))
    }

    pub async fn moderate(&self, request: &ModerationRequest) -> ModerationVerdict {
        let target = request.target;

        let content = match self.content.find(target).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    "Content not found for moderation, skipping"
                );
                return ModerationVerdict::NotFound;
            }
            Err(e) => {
                // Keep going: the pending write below is the part that matters.
                error!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    error = %e,
                    "Failed to load content for moderation"
                );
                return self.apply(request, None).await;
            }
        };

        if content.status.is_terminal() && content.moderated_at.is_some() {
            debug!(
                target_kind = %target.kind,
                target_id = %target.id,
                status = %content.status,
                "Content already resolved, moderation skipped"
            );
            return ModerationVerdict::AlreadyResolved;
        }

        self.apply(request, Some(content.owner_id)).await
    }

    async fn apply(&self, request: &ModerationRequest, owner_id: Option<Uuid>) -> ModerationVerdict {
        let target = request.target;

        match self.content.mark_pending(target).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    "Content could not be marked pending (missing or resolved)"
                );
            }
            Err(e) => {
                error!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    error = %e,
                    "Failed to mark content pending"
                );
            }
        }

        let hit = self.matcher.first_match(&request.text).map(str::to_owned);

        if let Err(e) = self.content.set_flagged(target, hit.is_some()).await {
            error!(
                target_kind = %target.kind,
                target_id = %target.id,
                flagged = hit.is_some(),
                error = %e,
                "Failed to update flag bit"
            );
        }

        let Some(keyword) = hit else {
            debug!(target_kind = %target.kind, target_id = %target.id, "Content clean");
            return ModerationVerdict::Clean;
        };

        metrics::record_keyword_flag(target.kind.as_str());

        let created_by = request.actor_id.or(owner_id).unwrap_or(SYSTEM_ACTOR_ID);
        let record = NewFlagRecord::keyword_violation(target, &keyword, created_by);

        match self.flags.append(record).await {
            Ok(saved) => {
                info!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    flag_id = %saved.id,
                    keyword = %keyword,
                    "Content flagged for banned keyword"
                );
            }
            Err(e) => {
                metrics::record_flag_persist_failure();
                error!(
                    target_kind = %target.kind,
                    target_id = %target.id,
                    keyword = %keyword,
                    error = %e,
                    "Failed to persist flag record"
                );
            }
        }

        ModerationVerdict::Flagged { keyword }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_is_case_insensitive_substring() {
        let matcher = KeywordMatcher::new(["Kill", "spam"]);
        assert_eq!(matcher.first_match("I will KILL them"), Some("kill"));
        assert_eq!(matcher.first_match("skillful play"), Some("kill"));
        assert_eq!(matcher.first_match("hello there"), None);
    }

    #[test]
    fn first_configured_keyword_wins() {
        let matcher = KeywordMatcher::new(["spam", "scam"]);
        assert_eq!(matcher.first_match("scam and spam"), Some("spam"));
    }

    #[test]
    fn empty_text_and_blank_keywords_never_match() {
        let matcher = KeywordMatcher::new(["", "  "]);
        assert!(matcher.is_empty());
        assert_eq!(KeywordMatcher::new(["x"]).first_match(""), None);
    }
}
