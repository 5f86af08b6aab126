//! Server startup and shutdown

use crate::app::config::AppConfig;
use crate::server::{self, AppState};
use crate::subprocess::SubprocessManager;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bind, serve, and return once a shutdown signal has drained the server.
pub async fn run(config: AppConfig) -> Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let state = AppState::new(config, SubprocessManager::production());
    if !state.secret.is_set() {
        warn!("MIHOMO_SECRET is not set; only loopback clients are accepted");
    }
    info!("Listening on {} (port {})", addr, addr.port());

    tokio::spawn(watch_signals(state.clone()));
    server::serve(listener, state).await.context("Server failed")?;

    info!("Server stopped");
    Ok(())
}

/// Cancel every session on Ctrl-C or SIGTERM
async fn watch_signals(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = state.shutdown.cancelled() => return,
    }
    state.shut_down();
}
