use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Upper bound for a single Redis round trip issued through [`with_timeout`].
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(3);

/// Redis connection handle shared by every component of a service.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager initialized");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Run a Redis future with [`DEFAULT_REDIS_TIMEOUT`], mapping an elapsed
/// deadline onto an IO-kind `RedisError`.
pub async fn with_timeout<F, T>(fut: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(DEFAULT_REDIS_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis operation timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_through_results() {
        let value = with_timeout(async { Ok::<_, RedisError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_deadline_to_io_error() {
        let result: Result<(), RedisError> = with_timeout(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), redis::ErrorKind::IoError);
    }
}
