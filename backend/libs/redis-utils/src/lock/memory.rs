use super::{DistributedLock, LockError, LockToken};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug)]
struct HeldLock {
    value: String,
    expires_at: Instant,
}

/// Process-local lock table.
///
/// Only serializes callers sharing the same `InMemoryLock` instance, so it is
/// suitable for a single service replica or for tests.
#[derive(Debug, Default)]
pub struct InMemoryLock {
    held: DashMap<String, HeldLock>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently has a live (unexpired) holder.
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .get(key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        if ttl.is_zero() {
            return Err(LockError::InvalidTtl(ttl));
        }

        let now = Instant::now();
        let token = LockToken::new(key);
        let fresh = HeldLock {
            value: token.value().to_string(),
            expires_at: now + ttl,
        };

        match self.held.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return Ok(None);
                }
                // Previous holder let the ttl lapse.
                entry.insert(fresh);
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }

        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> Result<bool, LockError> {
        let now = Instant::now();
        let removed = self
            .held
            .remove_if(token.key(), |_, held| {
                held.value == token.value() && held.expires_at > now
            })
            .is_some();
        Ok(removed)
    }
}
