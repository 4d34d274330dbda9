use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::metrics::HeartbeatMetrics;
use crate::registry::ConnectionRegistry;
use crate::websocket::OutboundFrame;

/// Background task for heartbeat and connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

/// Outcome of one heartbeat round
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeartbeatRound {
    pub sent: usize,
    pub evicted: usize,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup timers until shutdown
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = Duration::from_secs(self.config.connection_timeout);

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats();
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a ping for every connection.
    ///
    /// Pings go through the same outbound queue as events, so a connection
    /// that cannot take one is dropped just like a failed event write.
    pub(crate) fn send_heartbeats(&self) -> HeartbeatRound {
        let connections = self.registry.snapshot();
        if connections.is_empty() {
            return HeartbeatRound::default();
        }

        let start = Instant::now();
        let mut round = HeartbeatRound::default();

        for handle in connections {
            match handle.try_send(OutboundFrame::Ping) {
                Ok(()) => round.sent += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %handle.id,
                        error = %e,
                        "Failed to send heartbeat, dropping connection"
                    );
                    if self.registry.unregister(handle.id) {
                        round.evicted += 1;
                    }
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);

        tracing::debug!(
            sent = round.sent,
            evicted = round.evicted,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        round
    }

    /// Clean up connections that have been silent past the timeout
    pub(crate) fn cleanup_stale_connections(&self, connection_timeout: Duration) -> usize {
        let removed = self.registry.cleanup_stale(connection_timeout);

        if removed > 0 {
            HeartbeatMetrics::record_stale_removed(removed);
            tracing::info!(
                removed = removed,
                timeout_secs = connection_timeout.as_secs(),
                "Cleaned up stale connections"
            );
        }

        removed
    }
}
