use anyhow::Result;
use tracing::info;

mod api;
mod auth;
mod config;
mod database;
mod error;
mod events;
mod leaderboards;
mod models;
mod observability;
mod quotas;
mod rate_limit;
mod routes;
mod scoring;
mod store;
mod usage;
mod worker;

use api::AppState;
use auth::AuthService;
use config::Config;
use database::Database;
use events::EventPublisher;
use leaderboards::LeaderboardService;
use quotas::QuotaService;
use rate_limit::RateLimiter;
use routes::create_router;
use scoring::ScoringEngine;
use store::ScoreStore;
use usage::UsageTracker;
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Init order: config -> DB -> cache -> broker -> listeners.
    let config = Config::from_env()?;
    observability::init_tracing(&config.log_level);

    info!("Starting podium leaderboard platform");

    info!("Connecting to database...");
    let database = Database::new(&config.database.url, config.database.max_connections).await?;
    database.migrate().await?;

    info!("Connecting to score store...");
    let score_store = ScoreStore::connect(&config.store.url).await?;

    info!("Connecting to event stream...");
    let publisher = EventPublisher::connect(
        &config.stream.url,
        config.stream.stream_name.clone(),
        config.op_timeout_secs,
    )
    .await?;

    let auth = AuthService::new(
        database.clone(),
        score_store.clone(),
        config.auth.cache_ttl_secs,
    );
    let limiter = RateLimiter::new(
        score_store.clone(),
        config.rate_limit.enabled,
        config.rate_limit.fail_closed,
        config.rate_limit.key_ttl_secs,
    );
    let usage = UsageTracker::new(
        database.clone(),
        score_store.clone(),
        config.usage.retention_days,
        config.op_timeout_secs,
    );
    let scoring = ScoringEngine::new(score_store.clone(), publisher.clone());
    let leaderboards = LeaderboardService::new(database.clone(), publisher.clone());
    let quotas = QuotaService::new(database.clone());

    let worker_handle = Worker::new(
        publisher.jetstream().clone(),
        config.stream.stream_name.clone(),
        database.clone(),
        score_store.clone(),
    )
    .start();

    let app_state = AppState {
        database,
        auth,
        limiter,
        usage,
        scoring,
        leaderboards,
        quotas,
        publisher,
    };

    let app = create_router(app_state, config.auth.internal_api_secret.clone());

    let listener =
        tokio::net::TcpListener::bind(&format!("{}:{}", config.server.host, config.server.port))
            .await?;
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown reverses init: listeners drained above, then consumers, then
    // the pools drop.
    worker_handle.shutdown();
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
