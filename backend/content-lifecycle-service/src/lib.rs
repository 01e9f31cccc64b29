//! Content lifecycle service
//!
//! Owns the moderation and reaction-scoring core for user content (posts,
//! comments, comment replies and reels):
//!
//! - Keyword flagging of submitted text and the Pending -> Approved/Rejected
//!   moderation lifecycle
//! - Append-only flag records for the moderation review surface
//! - A scheduled sweep resolving Pending content past the age threshold
//! - Toggle-style like/dislike reactions with per-actor locking and a score
//!   recomputed in the same transaction as the reaction write
//! - Bounded task queue running moderation and reaction work off the request
//!   path

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{AppError, Result};
