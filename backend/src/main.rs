use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal;

use caps_elo_backend::config::{Config, StoreBackend};
use caps_elo_backend::db::{create_pool, run_migrations};
use caps_elo_backend::http::{configure_routes, AppState};
use caps_elo_backend::middleware::cors_middleware;
use caps_elo_backend::store::{MemoryStore, PgStore, Store};
use caps_elo_backend::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize telemetry
    init_telemetry(&config.server.rust_log);

    let store: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Postgres => {
            let pool = create_pool(&config.store).await?;
            run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = web::Data::new(AppState::new(
        store,
        &config.auth,
        &config.rating,
        config.store.retry_attempts,
    ));

    tracing::info!(
        "Starting caps-elo backend server on {}:{}",
        config.server.host,
        config.server.port
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors_middleware())
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind((config.server.host.clone(), config.server.port))?
    .run();

    // Graceful shutdown
    let server_handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    server.await?;
    Ok(())
}
