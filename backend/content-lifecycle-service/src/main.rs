use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use content_lifecycle_service::config::{LockBackend, LogFormat};
use content_lifecycle_service::db::{
    self, ContentStore, FlagRecordStore, PgContentStore, PgFlagRecordStore, PgReactionStore,
    ReactionStore,
};
use content_lifecycle_service::jobs::{start_moderation_sweep, ModerationSweep};
use content_lifecycle_service::metrics::serve_metrics;
use content_lifecycle_service::services::{
    KeywordFlagEngine, ModerationService, ReactionToggleEngine,
};
use content_lifecycle_service::workers::{spawn_task_workers, TaskHandlers, TaskQueue};
use content_lifecycle_service::Config;
use redis_utils::{DistributedLock, InMemoryLock, RedisLock, RedisPool, SharedConnectionManager};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct HealthState {
    db_pool: PgPool,
    redis: Option<SharedConnectionManager>,
}

impl HealthState {
    async fn check_postgres(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.db_pool)
            .await
            .map(|_| ())
    }

    async fn check_redis(&self) -> Result<(), redis::RedisError> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };
        let mut conn = redis.lock().await;
        let _: String = redis_utils::with_timeout(redis::cmd("PING").query_async(&mut *conn)).await?;
        Ok(())
    }
}

async fn health(state: web::Data<HealthState>) -> HttpResponse {
    match state.check_postgres().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "content-lifecycle-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "error": format!("PostgreSQL connection failed: {}", e),
            "service": "content-lifecycle-service"
        })),
    }
}

async fn readiness(state: web::Data<HealthState>) -> HttpResponse {
    let postgres = state.check_postgres().await.map_err(|e| e.to_string());
    let redis = state.check_redis().await.map_err(|e| e.to_string());
    let ready = postgres.is_ok() && redis.is_ok();

    let body = serde_json::json!({
        "ready": ready,
        "checks": {
            "postgresql": postgres.err().unwrap_or_else(|| "ok".to_string()),
            "redis": redis.err().unwrap_or_else(|| "ok".to_string()),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,content_lifecycle_service=debug,sqlx=warn".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.log_format);

    tracing::info!(
        env = %config.app.env,
        banned_keywords = config.moderation.banned_keywords.len(),
        "Starting content-lifecycle-service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    let (lock, redis): (Arc<dyn DistributedLock>, Option<SharedConnectionManager>) =
        match config.cache.lock_backend {
            LockBackend::Redis => {
                let pool = RedisPool::connect(&config.cache.url)
                    .await
                    .context("Failed to connect to Redis")?;
                let manager = pool.manager();
                let lock: Arc<dyn DistributedLock> = Arc::new(RedisLock::new(manager.clone()));
                (lock, Some(manager))
            }
            LockBackend::Memory => {
                tracing::warn!("Using in-process reaction locks; run a single replica only");
                let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryLock::new());
                (lock, None)
            }
        };

    let content_store: Arc<dyn ContentStore> = Arc::new(PgContentStore::new(db_pool.clone()));
    let flag_store: Arc<dyn FlagRecordStore> = Arc::new(PgFlagRecordStore::new(db_pool.clone()));
    let reaction_store: Arc<dyn ReactionStore> = Arc::new(PgReactionStore::new(db_pool.clone()));

    let flagger = Arc::new(KeywordFlagEngine::from_config(
        content_store.clone(),
        flag_store,
        &config.moderation,
    ));
    let moderation = Arc::new(ModerationService::new(content_store.clone()));
    let reactions = Arc::new(ReactionToggleEngine::from_config(
        reaction_store,
        lock,
        &config.reactions,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let sweep = Arc::new(ModerationSweep::from_config(
        content_store,
        moderation,
        &config.moderation,
    ));
    let sweep_handle = tokio::spawn(start_moderation_sweep(
        sweep,
        config.moderation.sweep_interval,
        shutdown_tx.subscribe(),
    ));

    // Producers (content creation and reaction endpoints) live in other
    // services; they hold clones of this queue.
    let (queue, receiver) = TaskQueue::bounded(config.workers.queue_capacity);
    let worker_handles = spawn_task_workers(
        receiver,
        queue,
        TaskHandlers {
            moderation: flagger,
            reactions,
        },
        &config.workers,
        &shutdown_tx,
    );

    let health_state = web::Data::new(HealthState {
        db_pool: db_pool.clone(),
        redis,
    });
    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Health and metrics server listening on {}", bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(health_state.clone())
            .route("/health", web::get().to(health))
            .route("/ready", web::get().to(readiness))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .workers(1)
    .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    server_handle.stop(true).await;

    let drain = async {
        let _ = sweep_handle.await;
        for handle in worker_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("Background tasks did not stop within 10s");
    }
    if let Ok(Err(e)) = server_task.await {
        tracing::error!(error = %e, "Health server exited with error");
    }

    db_pool.close().await;
    tracing::info!("content-lifecycle-service stopped");
    Ok(())
}
