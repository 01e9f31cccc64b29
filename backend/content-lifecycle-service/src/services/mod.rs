//! Moderation pipeline and reaction scoring.

pub mod keyword_flagger;
pub mod moderation;
pub mod reactions;

pub use keyword_flagger::{KeywordFlagEngine, KeywordMatcher, ModerationRequest, ModerationVerdict};
pub use moderation::{Decision, ModerationLifecycle, ModerationService, ResolveOutcome, Transition};
pub use reactions::{
    reaction_lock_key, ReactionRequest, ReactionToggleEngine, ToggleAction, ToggleOutcome,
};
