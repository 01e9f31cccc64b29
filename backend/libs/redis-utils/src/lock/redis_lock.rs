use super::{DistributedLock, LockError, LockToken};
use crate::pool::{with_timeout, SharedConnectionManager};
use async_trait::async_trait;
use redis::{AsyncCommands, ExistenceCheck, Script, SetExpiry, SetOptions};
use std::convert::TryFrom;
use tokio::time::Duration;
use tracing::debug;

/// Deletes the key only if it still carries the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lock shared by every replica pointing at the same Redis.
///
/// Key format: `{prefix}{key}`
#[derive(Clone)]
pub struct RedisLock {
    redis: SharedConnectionManager,
    prefix: String,
}

impl RedisLock {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self::with_prefix(redis, "lock:")
    }

    pub fn with_prefix(redis: SharedConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let ttl_ms = usize::try_from(ttl.as_millis()).map_err(|_| LockError::InvalidTtl(ttl))?;
        if ttl_ms == 0 {
            return Err(LockError::InvalidTtl(ttl));
        }

        let token = LockToken::new(key);
        let redis_key = self.redis_key(key);
        let mut conn = self.redis.lock().await.clone();

        // SET key token NX PX ttl
        let was_set: bool = with_timeout(conn.set_options(
            &redis_key,
            token.value(),
            SetOptions::default()
                .conditional_set(ExistenceCheck::NX)
                .with_expiration(SetExpiry::PX(ttl_ms)),
        ))
        .await?;

        if was_set {
            Ok(Some(token))
        } else {
            debug!(lock_key = %redis_key, "Lock held by another owner");
            Ok(None)
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool, LockError> {
        let redis_key = self.redis_key(token.key());
        let mut conn = self.redis.lock().await.clone();

        let deleted: i64 = with_timeout(
            Script::new(RELEASE_SCRIPT)
                .key(&redis_key)
                .arg(token.value())
                .invoke_async(&mut conn),
        )
        .await?;

        Ok(deleted > 0)
    }
}
