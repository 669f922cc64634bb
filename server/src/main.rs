//! Account Server - Main Entry Point

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use account_server::{api, auth::GoogleClient, config, db, email};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(config::log_filter(rust_log.as_deref()))
        .json()
        .init();

    // Load configuration
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Account Server"
    );

    // Initialize store
    let database = db::connect(&config.database_url).await?;

    // Collaborators
    let mailer = email::from_config(&config)?;
    if !config.has_google() {
        tracing::warn!("Google OAuth not configured, Google sign-in will fail");
    }
    let google = Arc::new(GoogleClient::from_config(&config));

    // Build application state
    let bind_address = config.bind_address.clone();
    let state = api::AppState::new(database, config, google, mailer);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
