/// Configuration management for Content Lifecycle Service
///
/// All values come from environment variables (optionally seeded from a `.env`
/// file). Engine-facing sections (`ModerationConfig`, `ReactionConfig`) are
/// plain values so tests can build them directly.
use redis_utils::LockOptions;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub moderation: ModerationConfig,
    pub reactions: ReactionConfig,
    pub workers: WorkerConfig,
}

/// Application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    /// Health / metrics server bind host
    pub host: String,
    /// Health / metrics server bind port
    pub port: u16,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

/// Cache (Redis) configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub lock_backend: LockBackend,
}

/// Where reaction locks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Redis,
    /// Process-local; only valid with a single replica.
    Memory,
}

/// Keyword filter and sweep settings
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Lower-cased, de-duplicated, in match order.
    pub banned_keywords: Vec<String>,
    /// Pending content older than this is resolved by the sweep.
    pub pending_max_age: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            banned_keywords: Vec::new(),
            pending_max_age: Duration::from_secs(2 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            sweep_batch_size: 500,
        }
    }
}

/// Reaction lock settings
#[derive(Debug, Clone, Copy)]
pub struct ReactionConfig {
    pub lock_ttl: Duration,
    pub lock_max_wait: Duration,
    pub lock_retry_interval: Duration,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(5),
            lock_max_wait: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(50),
        }
    }
}

impl ReactionConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: self.lock_ttl,
            max_wait: self.lock_max_wait,
            retry_interval: self.lock_retry_interval,
        }
    }
}

/// Deferred task execution settings
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_attempts: 5,
            retry_backoff_ms: 200,
            retry_max_backoff_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let log_format = match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Ok(v) => {
                return Err(AppError::Config(format!(
                    "LOG_FORMAT must be 'json' or 'pretty', got '{}'",
                    v
                )))
            }
            Err(_) if app_env.eq_ignore_ascii_case("production") => LogFormat::Json,
            Err(_) => LogFormat::Pretty,
        };

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if app_env.eq_ignore_ascii_case("production") => {
                return Err(AppError::Config(
                    "DATABASE_URL must be set in production".to_string(),
                ))
            }
            Err(_) => "postgres://localhost/nova".to_string(),
        };

        let lock_backend = match std::env::var("LOCK_BACKEND") {
            Ok(v) if v.eq_ignore_ascii_case("memory") => LockBackend::Memory,
            Ok(v) if v.eq_ignore_ascii_case("redis") => LockBackend::Redis,
            Ok(v) => {
                return Err(AppError::Config(format!(
                    "LOCK_BACKEND must be 'redis' or 'memory', got '{}'",
                    v
                )))
            }
            Err(_) => LockBackend::Redis,
        };

        let moderation_defaults = ModerationConfig::default();
        let reaction_defaults = ReactionConfig::default();
        let worker_defaults = WorkerConfig::default();

        let config = Config {
            app: AppConfig {
                env: app_env,
                host: std::env::var("HEALTH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or_default("HEALTH_PORT", 8091)?,
                log_format,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_env_or_default("DB_MAX_CONNECTIONS", 12)?,
                min_connections: parse_env_or_default("DB_MIN_CONNECTIONS", 4)?,
                acquire_timeout_secs: parse_env_or_default("DB_ACQUIRE_TIMEOUT_SECS", 10)?,
                idle_timeout_secs: parse_env_or_default("DB_IDLE_TIMEOUT_SECS", 600)?,
            },
            cache: CacheConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                lock_backend,
            },
            moderation: ModerationConfig {
                banned_keywords: load_banned_keywords()?,
                pending_max_age: Duration::from_secs(parse_env_or_default(
                    "MODERATION_PENDING_MAX_AGE_SECS",
                    moderation_defaults.pending_max_age.as_secs(),
                )?),
                sweep_interval: Duration::from_secs(parse_env_or_default(
                    "MODERATION_SWEEP_INTERVAL_SECS",
                    moderation_defaults.sweep_interval.as_secs(),
                )?),
                sweep_batch_size: parse_env_or_default(
                    "MODERATION_SWEEP_BATCH_SIZE",
                    moderation_defaults.sweep_batch_size,
                )?,
            },
            reactions: ReactionConfig {
                lock_ttl: Duration::from_millis(parse_env_or_default(
                    "REACTION_LOCK_TTL_MS",
                    reaction_defaults.lock_ttl.as_millis() as u64,
                )?),
                lock_max_wait: Duration::from_millis(parse_env_or_default(
                    "REACTION_LOCK_MAX_WAIT_MS",
                    reaction_defaults.lock_max_wait.as_millis() as u64,
                )?),
                lock_retry_interval: Duration::from_millis(parse_env_or_default(
                    "REACTION_LOCK_RETRY_MS",
                    reaction_defaults.lock_retry_interval.as_millis() as u64,
                )?),
            },
            workers: WorkerConfig {
                workers: parse_env_or_default("TASK_WORKERS", worker_defaults.workers)?,
                queue_capacity: parse_env_or_default(
                    "TASK_QUEUE_CAPACITY",
                    worker_defaults.queue_capacity,
                )?,
                max_attempts: parse_env_or_default(
                    "TASK_MAX_ATTEMPTS",
                    worker_defaults.max_attempts,
                )?,
                retry_backoff_ms: parse_env_or_default(
                    "TASK_RETRY_BACKOFF_MS",
                    worker_defaults.retry_backoff_ms,
                )?,
                retry_max_backoff_ms: parse_env_or_default(
                    "TASK_RETRY_MAX_BACKOFF_MS",
                    worker_defaults.retry_max_backoff_ms,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Values that parse but would stall or crash a background loop.
    fn validate(&self) -> Result<()> {
        let positive = [
            (
                "MODERATION_SWEEP_INTERVAL_SECS",
                !self.moderation.sweep_interval.is_zero(),
            ),
            (
                "MODERATION_SWEEP_BATCH_SIZE",
                self.moderation.sweep_batch_size > 0,
            ),
            ("REACTION_LOCK_TTL_MS", !self.reactions.lock_ttl.is_zero()),
            (
                "REACTION_LOCK_RETRY_MS",
                !self.reactions.lock_retry_interval.is_zero(),
            ),
            ("TASK_WORKERS", self.workers.workers > 0),
            ("TASK_QUEUE_CAPACITY", self.workers.queue_capacity > 0),
            ("TASK_MAX_ATTEMPTS", self.workers.max_attempts > 0),
        ];

        for (key, ok) in positive {
            if !ok {
                return Err(AppError::Config(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Keywords from `MODERATION_BANNED_KEYWORDS` (comma separated) followed by
/// those in `MODERATION_KEYWORDS_PATH`, if set.
fn load_banned_keywords() -> Result<Vec<String>> {
    let mut raw: Vec<String> = std::env::var("MODERATION_BANNED_KEYWORDS")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    if let Ok(path) = std::env::var("MODERATION_KEYWORDS_PATH") {
        raw.extend(load_keywords_file(&path)?);
    }

    Ok(normalize_keywords(raw))
}

/// One keyword per line; blank lines and `#` comments are skipped.
pub fn load_keywords_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        AppError::Config(format!(
            "Failed to load banned keywords from {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Trim, lower-case and de-duplicate while keeping first-seen order.
pub fn normalize_keywords<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut keywords: Vec<String> = Vec::new();
    for word in raw {
        let word = word.as_ref().trim().to_lowercase();
        if !word.is_empty() && !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Failed to parse {}='{}': {}", key, val, e))),
        Err(_) => Ok(default),
    }
}
