//! Background jobs
//!
//! - `moderation_sweep`: resolves Pending content once it ages past the
//!   configured threshold

pub mod moderation_sweep;

pub use moderation_sweep::{
    start_moderation_sweep, ModerationSweep, SweepReport, FAILED_ITEM_SKIP_RUNS,
};
