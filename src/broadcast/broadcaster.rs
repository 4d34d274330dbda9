use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::event::Event;
use crate::metrics::BroadcastMetrics;
use crate::registry::{ConnectionRegistry, SendError};
use crate::websocket::OutboundFrame;

/// Producer side of the queue feeding the broadcaster
pub type EventSender = mpsc::Sender<Event>;
/// Consumer side of the queue feeding the broadcaster
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the queue between the ingress listener and the broadcaster
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Result of one broadcast
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Connections in the snapshot
    pub recipients: usize,
    /// Connections the event was queued to
    pub delivered: usize,
    /// Connections whose write failed
    pub failed: usize,
    /// Connections unregistered by this broadcast
    pub evicted: Vec<Uuid>,
}

/// Statistics for the broadcaster
#[derive(Debug, Default)]
struct BroadcasterStats {
    events: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

/// Snapshot of broadcaster statistics
#[derive(Debug, Clone, Serialize)]
pub struct BroadcasterStatsSnapshot {
    pub events: u64,
    pub delivered: u64,
    pub failed: u64,
    pub evicted: u64,
}

/// Pushes events to every connection in the registry
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    stats: BroadcasterStats,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: BroadcasterStats::default(),
        }
    }

    /// Get broadcaster statistics
    pub fn stats(&self) -> BroadcasterStatsSnapshot {
        BroadcasterStatsSnapshot {
            events: self.stats.events.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }

    /// Deliver one event to every registered connection.
    ///
    /// Writes never wait: a connection whose buffer is full or closed counts
    /// as failed and is unregistered, the others are unaffected.
    #[tracing::instrument(
        name = "broadcaster.broadcast",
        skip(self, event),
        fields(bytes = event.len())
    )]
    pub fn broadcast(&self, event: &Event) -> DeliveryResult {
        let start = Instant::now();
        let connections = self.registry.snapshot();
        let recipients = connections.len();
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for conn in connections {
            match conn.try_send(OutboundFrame::Event(event.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    let reason = match e {
                        SendError::Full => "full",
                        SendError::Closed => "closed",
                    };
                    BroadcastMetrics::record_failure(reason);
                    tracing::warn!(
                        connection_id = %conn.id,
                        peer = ?conn.peer,
                        error = %e,
                        "Write failed, dropping connection"
                    );

                    if self.registry.unregister(conn.id) {
                        BroadcastMetrics::record_evicted();
                        evicted.push(conn.id);
                    }
                }
            }
        }

        let failed = recipients - delivered;
        let elapsed = start.elapsed();

        self.stats.events.fetch_add(1, Ordering::Relaxed);
        self.stats.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats.failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.stats
            .evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        BroadcastMetrics::record_broadcast(delivered, elapsed);

        tracing::debug!(
            recipients,
            delivered,
            failed,
            elapsed_us = elapsed.as_micros() as u64,
            queued_ms = (Utc::now() - event.received_at()).num_milliseconds(),
            "Event broadcast"
        );

        DeliveryResult {
            recipients,
            delivered,
            failed,
            evicted,
        }
    }

    /// Drain the event queue until every sender is gone or shutdown fires.
    ///
    /// On shutdown, events already queued are still broadcast.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Broadcaster started");

        loop {
            tokio::select! {
                biased;
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.broadcast(&event);
                        }
                        None => {
                            tracing::info!("Event queue closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Broadcaster received shutdown signal");
                    while let Ok(event) = events.try_recv() {
                        self.broadcast(&event);
                    }
                    break;
                }
            }
        }

        tracing::info!("Broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::ConnectionHandle;

    fn connect(
        registry: &ConnectionRegistry,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (registry.register(tx, None), rx)
    }

    fn expect_event(rx: &mut mpsc::Receiver<OutboundFrame>) -> Event {
        match rx.try_recv() {
            Ok(OutboundFrame::Event(event)) => event,
            other => panic!("expected event frame, got {:?}", other),
        }
    }

    const ACCEPTED: &str =
        r#"{"type":"quotation.accepted","rfqId":7,"message":"Quote Accepted for: Bulk Steel Rods"}"#;

    #[test]
    fn test_broadcast_reaches_every_connection_byte_exact() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (_a, mut rx_a) = connect(&registry, 8);
        let (_b, mut rx_b) = connect(&registry, 8);
        let (_c, mut rx_c) = connect(&registry, 8);

        let result = broadcaster.broadcast(&Event::new(ACCEPTED));

        assert_eq!(result.recipients, 3);
        assert_eq!(result.delivered, 3);
        assert_eq!(result.failed, 0);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(expect_event(rx).as_bytes(), ACCEPTED.as_bytes());
            // Exactly once
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_failing_connection_is_isolated_and_evicted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (a, mut rx_a) = connect(&registry, 8);
        let (b, rx_b) = connect(&registry, 8);
        let (c, mut rx_c) = connect(&registry, 8);

        // B's socket task is gone
        drop(rx_b);

        let result = broadcaster.broadcast(&Event::new(ACCEPTED));

        assert_eq!(result.delivered, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.evicted, vec![b.id]);
        assert_eq!(expect_event(&mut rx_a).as_bytes(), ACCEPTED.as_bytes());
        assert_eq!(expect_event(&mut rx_c).as_bytes(), ACCEPTED.as_bytes());

        let remaining: Vec<Uuid> = registry.snapshot().iter().map(|h| h.id).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&a.id));
        assert!(remaining.contains(&c.id));
        assert!(!registry.contains(b.id));
    }

    #[test]
    fn test_full_buffer_counts_as_failed_write() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (_a, mut rx_a) = connect(&registry, 8);
        let (slow, _rx_slow) = connect(&registry, 1);

        broadcaster.broadcast(&Event::new("first"));
        let second = broadcaster.broadcast(&Event::new("second"));

        assert_eq!(second.delivered, 1);
        assert_eq!(second.evicted, vec![slow.id]);
        assert_eq!(expect_event(&mut rx_a).as_bytes(), b"first");
        assert_eq!(expect_event(&mut rx_a).as_bytes(), b"second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_late_registrant_gets_no_backlog() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (_a, mut rx_a) = connect(&registry, 8);

        broadcaster.broadcast(&Event::new("before"));
        let (_late, mut rx_late) = connect(&registry, 8);

        assert!(rx_late.try_recv().is_err());
        assert_eq!(expect_event(&mut rx_a).as_bytes(), b"before");

        broadcaster.broadcast(&Event::new("after"));
        assert_eq!(expect_event(&mut rx_late).as_bytes(), b"after");
    }

    #[test]
    fn test_broadcast_to_empty_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry);

        let result = broadcaster.broadcast(&Event::new("nobody"));
        assert_eq!(result.recipients, 0);
        assert_eq!(result.delivered, 0);

        let stats = broadcaster.stats();
        assert_eq!(stats.events, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_run_preserves_queue_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let (_a, mut rx_a) = connect(&registry, 8);
        let (_b, mut rx_b) = connect(&registry, 8);
        let (events_tx, events_rx) = event_queue(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(broadcaster.clone().run(events_rx, shutdown_rx));

        events_tx.send(Event::new("E1")).await.unwrap();
        events_tx.send(Event::new("E2")).await.unwrap();
        drop(events_tx);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("broadcaster should stop when the queue closes")
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(expect_event(rx).as_bytes(), b"E1");
            assert_eq!(expect_event(rx).as_bytes(), b"E2");
        }
        assert_eq!(broadcaster.stats().events, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry));
        let (_events_tx, events_rx) = event_queue(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(broadcaster.run(events_rx, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("broadcaster should stop on shutdown")
            .unwrap();
    }
}
