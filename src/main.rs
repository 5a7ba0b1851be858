//! Elidune circulation worker
//!
//! Connects to PostgreSQL, applies migrations and keeps the policy cache and the
//! expiry sweeper running until interrupted.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elidune_circulation::{
    clock::SystemClock, config::AppConfig, repository::Repository, services::Services, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("elidune_circulation={},sqlx=warn", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Elidune circulation v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database migrations completed");

    let repository = Repository::new(pool);
    let services = Services::new(
        repository,
        Arc::new(SystemClock),
        &config.policy_cache,
        &config.sweeper,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    if let Err(e) = state.services.policy_cache.refresh().await {
        tracing::warn!("Initial policy cache load failed: {}", e);
    }
    let cache_task = tokio::spawn(state.services.policy_cache.clone().run());

    let sweeper_task = if state.config.sweeper.enabled {
        Some(tokio::spawn(state.services.sweeper.clone().run()))
    } else {
        tracing::info!("Expiry sweeper disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    state.services.shutdown();
    cache_task.await?;
    if let Some(task) = sweeper_task {
        task.await?;
    }

    tracing::info!("Stopped");
    Ok(())
}
