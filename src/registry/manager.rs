use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::ConnectionMetrics;
use crate::websocket::OutboundFrame;

use super::{ConnectionHandle, RegistryStats};

const LATE_CLOSE_REASON: &str = "server shutting down";

/// Manages all active subscriber connections
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// Subscriber socket tasks still running
    active_sockets: Arc<AtomicUsize>,
    /// Set by `close_all`; later registrations are closed on arrival
    closing: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            active_sockets: Arc::new(AtomicUsize::new(0)),
            closing: AtomicBool::new(false),
        }
    }

    /// Register a new connection
    pub fn register(
        &self,
        sender: mpsc::Sender<OutboundFrame>,
        peer: Option<SocketAddr>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(sender, peer));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());
        ConnectionMetrics::set_active(self.connections.len());

        tracing::info!(
            connection_id = %conn_id,
            peer = ?handle.peer,
            total = self.connections.len(),
            "Connection registered"
        );

        // An upgrade that raced shutdown missed the close_all snapshot
        if self.is_closing() {
            let _ = handle.try_send(OutboundFrame::going_away(LATE_CLOSE_REASON));
            self.unregister(conn_id);
        }

        handle
    }

    /// Unregister a connection.
    ///
    /// Idempotent: returns true only for the call that actually removed it.
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        handle.close();
        ConnectionMetrics::set_active(self.connections.len());

        tracing::info!(
            connection_id = %connection_id,
            peer = ?handle.peer,
            total = self.connections.len(),
            "Connection unregistered"
        );

        true
    }

    /// Current connections, for fan-out outside the map lock
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by ID
    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            active_sockets: self.active_sockets(),
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale(&self, idle_timeout: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove stale connections and return the count of removed connections
    pub fn cleanup_stale(&self, idle_timeout: Duration) -> usize {
        let stale = self.find_stale(idle_timeout);
        let mut removed = 0;

        for conn_id in stale {
            tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
            if self.unregister(conn_id) {
                removed += 1;
            }
        }

        removed
    }

    /// True once `close_all` has run
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Queue a close frame to every connection and unregister it.
    ///
    /// Connections registered afterwards are closed as soon as they arrive.
    pub fn close_all(&self, reason: &str) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let mut closed = 0;

        for handle in self.snapshot() {
            if let Err(e) = handle.try_send(OutboundFrame::going_away(reason)) {
                tracing::debug!(connection_id = %handle.id, error = %e, "Close frame not queued");
            }
            if self.unregister(handle.id) {
                closed += 1;
            }
        }

        closed
    }

    /// Track a running subscriber socket until the guard is dropped
    pub fn open_socket(&self) -> SocketGuard {
        self.active_sockets.fetch_add(1, Ordering::SeqCst);
        SocketGuard {
            active_sockets: self.active_sockets.clone(),
        }
    }

    pub fn active_sockets(&self) -> usize {
        self.active_sockets.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the live socket count on drop
#[derive(Debug)]
pub struct SocketGuard {
    active_sockets: Arc<AtomicUsize>,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.active_sockets.fetch_sub(1, Ordering::SeqCst);
    }
}
