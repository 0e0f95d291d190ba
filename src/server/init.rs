//! Server initialization and main run loop
//!
//! Contains the main `run()` function that starts all server components.

use super::config::AppConfig;
use super::validation::validate_config;
use anyhow::{Context, Result};
use drawpile_server::{wait_for_shutdown_signal, Server, ServerStore, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Run the server until a shutdown signal or auto-stop
pub async fn run(config: AppConfig) -> Result<()> {
    validate_config(&config)?;

    let store = init_store(&config).await?;
    let shutdown = ShutdownController::with_timeout(Duration::from_secs(config.server.drain_timeout_secs));
    let server = Server::new(config.server.clone(), store, Arc::clone(&shutdown));

    let (addr, accept) = server
        .start()
        .await
        .with_context(|| format!("Failed to listen on {}", config.server.listen_addr()))?;
    info!(%addr, "Accepting drawing clients");

    let admin = if config.admin.enabled() {
        Some(start_admin_api(&config, &server, &shutdown).await?)
    } else {
        info!("Admin API disabled");
        None
    };

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            shutdown.shutdown().await;
        });
    }

    shutdown.terminated().await;

    if tokio::time::timeout(Duration::from_secs(5), accept).await.is_err() {
        warn!("Listener did not stop in time");
    }
    if let Some(handle) = admin {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Admin API task failed"),
            Err(_) => warn!("Admin API shutdown timeout, aborting"),
        }
    }

    info!("Drawpile server shutdown complete");
    Ok(())
}

async fn init_store(config: &AppConfig) -> Result<ServerStore> {
    let Some(path) = &config.database.path else {
        return ServerStore::in_memory()
            .await
            .context("Failed to open in-memory database");
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    let store = ServerStore::from_path(path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    info!(path = %path.display(), "Database opened");
    Ok(store)
}

async fn start_admin_api(
    config: &AppConfig,
    server: &Arc<Server>,
    shutdown: &Arc<ShutdownController>,
) -> Result<JoinHandle<()>> {
    let app = crate::api::router(Arc::clone(server));
    let listener = tokio::net::TcpListener::bind(config.admin.listen_addr())
        .await
        .with_context(|| format!("Failed to bind admin API to {}", config.admin.listen_addr()))?;
    info!(addr = %config.admin.listen_addr(), "Admin API listening");

    let token = shutdown.token();
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            warn!(error = %e, "Admin API stopped with error");
        }
    }))
}
