/// Error types for content-lifecycle-service
use redis_utils::LockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Failures from non-SQL storage backends.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, AppError::Lock(LockError::Timeout { .. }))
    }

    /// Whether re-running the same task later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Lock(LockError::InvalidTtl(_)) => false,
            AppError::Lock(_) | AppError::Database(_) | AppError::Storage(_) => true,
            AppError::InvalidInput(_) | AppError::Config(_) | AppError::Internal(_) => false,
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(sqlx::Error::Migrate(Box::new(err)))
    }
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lock_timeout_is_retryable() {
        let err = AppError::from(LockError::Timeout {
            key: "reaction:post:1:2".to_string(),
            waited: Duration::from_secs(5),
        });
        assert!(err.is_lock_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_lock_ttl_is_not_retryable() {
        let err = AppError::from(LockError::InvalidTtl(Duration::ZERO));
        assert!(!err.is_lock_timeout());
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_input_is_not_retryable() {
        let err = AppError::InvalidInput("bad".to_string());
        assert!(!err.is_lock_timeout());
        assert!(!err.is_retryable());
    }
}
