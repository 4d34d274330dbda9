//! Graceful shutdown handling for the event hub.
//!
//! The sequence is:
//! 1. Signal the listeners and background tasks to stop
//! 2. Send a going-away close frame to every subscriber and unregister it
//! 3. Wait for the socket tasks to finish flushing, up to a drain timeout

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::ShutdownSettings;
use crate::registry::ConnectionRegistry;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for subscriber sockets to close (default: 5 seconds)
    pub drain_timeout: Duration,
    /// Interval between drain checks
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        Self {
            drain_timeout: settings.drain_timeout(),
            ..Self::default()
        }
    }
}

/// Coordinates shutdown of the hub
pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(registry, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: stop accepting producers and subscribers
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Signaling tasks to stop");
        let _ = self.shutdown_tx.send(());

        // Phase 2: close every subscriber
        tracing::info!("Phase 2: Closing subscriber connections");
        result.connections_closed = self.registry.close_all(reason);

        // Phase 3: wait for sockets to flush their close frames
        tracing::info!("Phase 3: Waiting for sockets to drain");
        result.remaining_sockets = self.wait_for_sockets_to_drain().await;
        result.sockets_drained = result.remaining_sockets == 0;

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            connections_closed = result.connections_closed,
            sockets_drained = result.sockets_drained,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Returns the number of sockets still open when the wait ended
    async fn wait_for_sockets_to_drain(&self) -> usize {
        if self.registry.active_sockets() == 0 {
            return 0;
        }

        let wait_future = async {
            loop {
                tokio::time::sleep(self.config.poll_interval).await;
                if self.registry.active_sockets() == 0 {
                    break;
                }
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.registry.active_sockets();
        if remaining > 0 {
            tracing::warn!(
                remaining_sockets = remaining,
                "Some sockets did not close before the drain timeout"
            );
        }
        remaining
    }
}

/// Result of a graceful shutdown
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Subscribers that were sent a close frame and unregistered
    pub connections_closed: usize,
    /// Whether every socket task finished before the drain timeout
    pub sockets_drained: bool,
    pub remaining_sockets: usize,
    pub duration: Duration,
}
