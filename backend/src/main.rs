use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;

use livescore_backend::auth::{JwtConfig, JwtService};
use livescore_backend::config::Config;
use livescore_backend::db::create_pool;
use livescore_backend::http::{configure_routes, configure_ws_routes, health, AppState};
use livescore_backend::middleware::cors_middleware;
use livescore_backend::service::journal::Journal;
use livescore_backend::service::match_registry::MatchRegistry;
use livescore_backend::service::transport::RedisRelay;
use livescore_backend::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize telemetry
    init_telemetry(&config.server.rust_log);

    let journal = match &config.database {
        Some(database) => {
            let pool = create_pool(&database.url)
                .await
                .context("Failed to create database pool")?;
            Journal::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, journaling to memory");
            Journal::in_memory()
        }
    };

    let mut registry = MatchRegistry::new(Arc::new(journal), config.sync.channel_config());
    if let Some(redis) = &config.redis {
        let relay = RedisRelay::connect(&redis.url, config.sync.delta_buffer_retention_secs)
            .await
            .context("Failed to connect to Redis")?;
        registry = registry.with_relay(relay);
    }

    let jwt = JwtService::new(JwtConfig::new(
        config.auth.jwt_secret.clone(),
        config.auth.jwt_issuer.clone(),
    ));
    let state = web::Data::new(AppState {
        registry: Arc::new(registry),
        reorder_window: config.sync.reorder_window,
    });
    let cors_origins = config.server.cors_origins.clone();

    tracing::info!(
        "Starting live match sync server on {}:{}",
        config.server.host,
        config.server.port
    );

    let server = HttpServer::new(move || {
        let jwt = jwt.clone();
        App::new()
            .app_data(state.clone())
            .wrap(cors_middleware(&cors_origins))
            .wrap(actix_web::middleware::Logger::default())
            .route("/api/health", web::get().to(health::health_check))
            .configure(|cfg| configure_routes(cfg, &jwt))
            .configure(configure_ws_routes)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run();

    // Graceful shutdown
    let server_handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    server.await?;
    Ok(())
}
