use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::broadcast::EventSender;
use crate::config::IngressConfig;
use crate::error::{AppError, Result};
use crate::event::Event;
use crate::metrics::IngressMetrics;

use super::reader::{read_payload, PayloadRead};

/// Counters for producer connections
#[derive(Debug, Default)]
pub struct IngressStats {
    accepted: AtomicU64,
    forwarded: AtomicU64,
    empty: AtomicU64,
    timed_out: AtomicU64,
    too_large: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of ingress statistics
#[derive(Debug, Clone, Serialize)]
pub struct IngressStatsSnapshot {
    pub accepted: u64,
    pub forwarded: u64,
    pub empty: u64,
    pub timed_out: u64,
    pub too_large: u64,
    pub failed: u64,
}

impl IngressStats {
    pub fn snapshot(&self) -> IngressStatsSnapshot {
        IngressStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            too_large: self.too_large.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, read: &PayloadRead) {
        let counter = match read {
            PayloadRead::Complete(_) => &self.forwarded,
            PayloadRead::Empty => &self.empty,
            PayloadRead::TimedOut { .. } => &self.timed_out,
            PayloadRead::TooLarge { .. } => &self.too_large,
            PayloadRead::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of one producer connection, resolved when its read finishes
type PendingEvent = oneshot::Receiver<Option<Event>>;

/// Accepts one-shot producer connections and feeds the broadcaster queue.
///
/// Producers are read concurrently, but events reach the queue in the order
/// their connections were accepted. A silent producer holds back later events
/// for at most the read timeout.
pub struct IngressListener {
    config: IngressConfig,
    events: EventSender,
    stats: Arc<IngressStats>,
}

impl IngressListener {
    pub fn new(config: IngressConfig, events: EventSender, stats: Arc<IngressStats>) -> Self {
        Self {
            config,
            events,
            stats,
        }
    }

    /// Bind the configured ingress address
    pub async fn bind(config: &IngressConfig) -> Result<TcpListener> {
        let addr = format!("{}:{}", config.host, config.port);

        if !config.is_loopback() {
            tracing::warn!(
                addr = %addr,
                "Ingress is bound to a non-loopback address; producers are not authenticated"
            );
        }

        TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })
    }

    /// Accept producer connections until shutdown
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        let local_addr = listener.local_addr().ok();
        tracing::info!(
            addr = ?local_addr,
            read_timeout_ms = self.config.read_timeout_ms,
            max_payload_bytes = self.config.max_payload_bytes,
            "Ingress listener started"
        );

        let (pending_tx, pending_rx) = mpsc::channel::<PendingEvent>(self.config.queue_capacity.max(1));
        let forwarder = tokio::spawn(forward_in_order(pending_rx, self.events.clone()));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Ingress listener received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let (slot, pending) = oneshot::channel();
                            if pending_tx.send(pending).await.is_err() {
                                tracing::warn!("Ingress forwarder is gone");
                                break;
                            }
                            self.spawn_producer(stream, peer, slot);
                        }
                        Err(e) => {
                            // Per-connection accept errors (e.g. EMFILE) are not fatal
                            tracing::warn!(error = %e, "Failed to accept producer connection");
                        }
                    }
                }
            }
        }

        // Stop accepting, then let reads already in flight reach the queue
        drop(listener);
        drop(pending_tx);
        if let Err(e) = forwarder.await {
            tracing::error!(error = %e, "Ingress forwarder panicked");
        }

        tracing::info!("Ingress listener stopped");
    }

    fn spawn_producer(&self, stream: TcpStream, peer: SocketAddr, slot: oneshot::Sender<Option<Event>>) {
        let stats = self.stats.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let event = handle_producer(stream, peer, &config, &stats).await;
            // Err only if the forwarder has already stopped
            let _ = slot.send(event);
        });
    }
}

/// Queue events in accept order as their reads complete
async fn forward_in_order(mut pending: mpsc::Receiver<PendingEvent>, events: EventSender) {
    while let Some(slot) = pending.recv().await {
        // A dropped slot means the reader task panicked
        let Ok(Some(event)) = slot.await else {
            continue;
        };

        if events.send(event).await.is_err() {
            tracing::warn!("Broadcaster is gone, event dropped");
        }
    }
}

/// Read one payload from a producer
async fn handle_producer(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &IngressConfig,
    stats: &IngressStats,
) -> Option<Event> {
    stats.accepted.fetch_add(1, Ordering::Relaxed);
    IngressMetrics::record_accepted();
    tracing::debug!(peer = %peer, "Producer connected");

    let read = read_payload(&mut stream, config.read_timeout(), config.max_payload_bytes).await;
    stats.record(&read);
    IngressMetrics::record_outcome(read.outcome());

    match read {
        PayloadRead::Complete(payload) => {
            let len = payload.len();
            IngressMetrics::record_payload_size(len);
            tracing::info!(peer = %peer, bytes = len, "Forwarding event");
            // Dropping the stream closes the connection; producers get no reply
            return Some(Event::new(payload));
        }
        PayloadRead::Empty => {
            tracing::debug!(peer = %peer, "Producer closed without a payload");
        }
        PayloadRead::TimedOut { received } => {
            tracing::warn!(
                peer = %peer,
                received,
                timeout_ms = config.read_timeout_ms,
                "Producer read timed out, payload discarded"
            );
        }
        PayloadRead::TooLarge { limit } => {
            tracing::warn!(peer = %peer, limit, "Producer payload too large, discarded");
        }
        PayloadRead::Failed(e) => {
            tracing::warn!(peer = %peer, error = %e, "Producer connection failed");
        }
    }

    None
}
