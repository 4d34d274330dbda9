use anyhow::{Context, Result};
use tokio::signal;

use rfq_event_hub::config::Settings;
use rfq_event_hub::server::HubServer;
use rfq_event_hub::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    // Initialize tracing; keep the guard alive until exit
    let _telemetry = init_telemetry(&settings.otel, settings.log.format)?;
    tracing::info!(
        public = %settings.server_addr(),
        ingress = %settings.ingress_addr(),
        "Configuration loaded"
    );

    // Both listeners must bind or the process exits
    let hub = HubServer::bind(settings).await?;

    let result = hub.run(shutdown_signal()).await?;

    tracing::info!(
        connections_closed = result.connections_closed,
        sockets_drained = result.sockets_drained,
        duration_ms = result.duration.as_millis() as u64,
        "Server shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
