//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::AdmissionController;
use crate::sweeper::spawn_cleanup;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How often the background sweeper drops expired tickets.
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

/// Serve the gate over HTTP until SIGINT, SIGTERM, or `shutdown` fires.
///
/// The expired-ticket sweeper runs for as long as the server does.
pub async fn serve(
    config: ServerConfig,
    controller: Arc<AdmissionController>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = routes(Arc::clone(&controller));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(
        capacity_limit = controller.config().capacity_limit,
        "Starting waitroom server on {}", actual_addr
    );

    let sweeper_shutdown = shutdown.child_token();
    let sweeper = spawn_cleanup(controller, config.cleanup_interval, sweeper_shutdown.clone());

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    sweeper_shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Expired-ticket sweeper ended abnormally");
    }

    result?;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT, SIGTERM, or an explicit cancellation.
///
/// A signal handler that cannot be installed is logged and never fires.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown requested, shutting down...");
        }
    }
}
