//! MailRamp - Campaign sending engine entry point

use anyhow::{Context, Result};
use mailramp_api::AppState;
use mailramp_common::config::{Config, LoggingConfig};
use mailramp_common::SystemClock;
use mailramp_core::delivery::RelaySettings;
use mailramp_core::{Engine, SmtpTransport};
use mailramp_storage::{DatabasePool, Stores};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting MailRamp...");

    // Initialize storage
    let (stores, db_pool) = match config.database.backend.as_str() {
        "memory" => {
            warn!("Using in-memory storage, campaign state is lost on restart");
            (Stores::memory(), None)
        }
        _ => {
            let db_pool = DatabasePool::new(&config.database).await?;
            info!("Database connection established");

            db_pool.migrate().await?;
            info!("Database migrations completed");

            (Stores::postgres(db_pool.clone()), Some(db_pool))
        }
    };

    let transport = Arc::new(SmtpTransport::new(RelaySettings::from_config(&config.smtp)));
    info!(
        "Default relay {}:{}",
        config.smtp.host, config.smtp.port
    );

    let engine = Arc::new(
        Engine::new(config.clone(), stores, transport, Arc::new(SystemClock))
            .context("Failed to build the sending engine")?,
    );
    engine.recover().await?;

    // Start queue workers
    let (batch_worker, send_worker) = engine.workers();
    let batch_handle = tokio::spawn(async move {
        batch_worker.run().await;
    });
    let send_handle = tokio::spawn(async move {
        send_worker.run().await;
    });

    let maintenance_handle = tokio::spawn(engine.clone().maintenance_loop());

    // Start API server
    let bind = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind API server on {}", bind))?;
    let app = mailramp_api::create_router(AppState::new(engine.clone(), db_pool));
    info!("Starting API server on {}", bind);

    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    info!("MailRamp started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Running jobs are reset on the next start
    api_handle.abort();
    batch_handle.abort();
    send_handle.abort();
    maintenance_handle.abort();

    info!("MailRamp shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailramp=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
