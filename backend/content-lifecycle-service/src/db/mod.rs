/// Database access layer
///
/// - Connection pool bootstrap and embedded migrations
/// - Store traits for content moderation state, flag records and reactions
/// - PostgreSQL implementations (`Pg*Store`) and an in-memory backend
pub mod content_repo;
pub mod flag_repo;
pub mod memory;
pub mod reaction_repo;

pub use content_repo::{ContentStore, PgContentStore};
pub use flag_repo::{FlagRecordStore, PgFlagRecordStore};
pub use memory::InMemoryStore;
pub use reaction_repo::{PgReactionStore, ReactionStore, ReactionTx};

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Create a PostgreSQL pool and verify it with a round trip.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    match tokio::time::timeout(
        Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await
    {
        Ok(Ok(_)) => {
            info!(
                max_connections = config.max_connections,
                min_connections = config.min_connections,
                "Database pool created and verified"
            );
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(error = %e, "Database connection verification failed");
            Err(e.into())
        }
        Err(_) => {
            error!("Database connection verification timeout");
            Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Database verification timeout",
            ))
            .into())
        }
    }
}

/// Apply the migrations embedded from `./migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed successfully");
    Ok(())
}
