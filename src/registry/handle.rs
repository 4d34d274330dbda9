//! Connection handle and related types

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::websocket::OutboundFrame;

/// Why a frame could not be queued for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbound buffer is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Handle for a single subscriber connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix millis) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    /// `None` once the connection has been closed. Enqueue and close both take
    /// this lock, so nothing is queued after close returns.
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundFrame>, peer: Option<SocketAddr>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            outbound: Mutex::new(Some(sender)),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    /// Queue a frame without waiting.
    ///
    /// A full buffer is reported as a failure: the broadcaster never waits on
    /// a slow subscriber.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        let outbound = self.outbound();
        let Some(sender) = outbound.as_ref() else {
            return Err(SendError::Closed);
        };

        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Drop the write side. Returns false if it was already closed.
    ///
    /// Frames queued before the close are still flushed by the send task.
    pub fn close(&self) -> bool {
        self.outbound().take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.outbound()
            .as_ref()
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<OutboundFrame>>> {
        // A poisoned lock only means another thread panicked mid-send; the
        // Option inside is still consistent.
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx, None);

        assert!(handle.try_send(OutboundFrame::Ping).is_ok());
        assert!(handle.close());
        assert!(!handle.close());
        assert_eq!(handle.try_send(OutboundFrame::Ping), Err(SendError::Closed));

        // The frame queued before close is still delivered, then the queue ends
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Ping)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_full_buffer_is_reported() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx, None);

        assert!(handle.try_send(OutboundFrame::Event(Event::new("a"))).is_ok());
        assert_eq!(
            handle.try_send(OutboundFrame::Event(Event::new("b"))),
            Err(SendError::Full)
        );
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx, None);
        drop(rx);

        assert!(!handle.is_open());
        assert_eq!(handle.try_send(OutboundFrame::Ping), Err(SendError::Closed));
    }

    #[test]
    fn test_activity_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx, None);
        let past = Utc::now() - chrono::Duration::minutes(10);

        handle.set_last_activity(past);
        assert!(handle.last_activity() <= past + chrono::Duration::milliseconds(1));

        handle.update_activity();
        assert!(handle.last_activity() > past);
    }
}
