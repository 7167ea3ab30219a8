mod bootstrap;
mod chat;
mod health;

use std::time::Duration;

use anyhow::Result;
use parley_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let routes = bootstrap::router(app.state, &app.config.server.allowed_origins)?;

    let address = app.config.listen_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        provider = app.config.llm.provider.as_str(),
        "parley-server listening"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown(grace)).await?;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "parley-server stopped"
    );
    Ok(())
}

/// Resolves on the first ctrl-c. A watchdog then forces exit if in-flight
/// streams have not drained within `grace`.
async fn wait_for_shutdown(grace: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "shutdown requested; draining open streams"
    );

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "open streams did not drain in time; exiting"
        );
        std::process::exit(1);
    });
}
