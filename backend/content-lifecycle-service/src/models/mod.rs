//! Domain models shared by the moderation and reaction paths.

pub mod content;
pub mod flag;
pub mod reaction;
pub mod target;

pub use content::{Actor, ModeratedContent, ModerationStatus, Viewer, SYSTEM_ACTOR_ID};
pub use flag::{FlagRecord, NewFlagRecord, KEYWORD_VIOLATION};
pub use reaction::{Reaction, ReactionKind, ReactionTally};
pub use target::{TargetKind, TargetRef};
