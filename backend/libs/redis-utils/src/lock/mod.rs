//! Short-lived named locks.
//!
//! A lock is identified by a caller-built key string and held for at most
//! `ttl`; the TTL releases the lock if the holder crashes before calling
//! [`DistributedLock::release`]. Acquisition polls until `max_wait` elapses and
//! then fails with [`LockError::Timeout`].
//!
//! Backends:
//! - [`RedisLock`]: `SET key token NX PX ttl`, released with a compare-and-delete script
//! - [`InMemoryLock`]: process-local map, for single-instance deployments and tests

mod memory;
mod redis_lock;

pub use memory::InMemoryLock;
pub use redis_lock::RedisLock;

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid lock ttl {0:?}")]
    InvalidTtl(Duration),
}

/// Proof of ownership returned by a successful acquisition.
#[derive(Debug, Clone)]
pub struct LockToken {
    key: String,
    value: String,
    acquired_at: Instant,
}

impl LockToken {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: uuid::Uuid::new_v4().to_string(),
            acquired_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Time elapsed since the lock was granted.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Expiry applied to the lock entry.
    pub ttl: Duration,
    /// Maximum time spent waiting for a contended lock.
    pub max_wait: Duration,
    /// Pause between acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_wait: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Single acquisition attempt. `Ok(None)` means another holder owns the key.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError>;

    /// Release a lock previously granted to `token`. Returns false when the
    /// entry expired or now belongs to another holder.
    async fn release(&self, token: &LockToken) -> Result<bool, LockError>;

    /// Poll [`try_acquire`](Self::try_acquire) until granted or `max_wait` elapses.
    async fn acquire(&self, key: &str, options: &LockOptions) -> Result<LockToken, LockError> {
        if options.ttl.is_zero() {
            return Err(LockError::InvalidTtl(options.ttl));
        }

        let started = Instant::now();
        let deadline = started + options.max_wait;

        loop {
            if let Some(token) = self.try_acquire(key, options.ttl).await? {
                debug!(
                    lock_key = %key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Lock acquired"
                );
                return Ok(token);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: now - started,
                });
            }

            sleep(options.retry_interval.min(deadline - now)).await;
        }
    }
}

/// Run `body` while holding `key`.
///
/// `body` never runs if the lock cannot be acquired within `max_wait`. The lock
/// is released once `body` finishes, whether it succeeded or not; a failed
/// release is logged and left to the TTL.
pub async fn with_lock<L, F, Fut, T, E>(
    lock: &L,
    key: &str,
    options: &LockOptions,
    body: F,
) -> Result<T, E>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    with_lock_observed(lock, key, options, |_| {}, body).await
}

/// [`with_lock`], additionally handing `on_release` the time from grant to
/// release. Not called when acquisition fails.
pub async fn with_lock_observed<L, F, Fut, T, E, O>(
    lock: &L,
    key: &str,
    options: &LockOptions,
    on_release: O,
    body: F,
) -> Result<T, E>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
    O: FnOnce(Duration),
{
    let token = lock.acquire(key, options).await?;

    let result = body().await;

    match lock.release(&token).await {
        Ok(true) => {}
        Ok(false) => warn!(
            lock_key = %key,
            held_ms = token.held_for().as_millis() as u64,
            "Lock expired before release"
        ),
        Err(e) => warn!(
            lock_key = %key,
            error = %e,
            "Failed to release lock, relying on ttl"
        ),
    }
    on_release(token.held_for());

    result
}
