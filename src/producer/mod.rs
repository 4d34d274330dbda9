//! Fire-and-forget publishing of events to the hub's ingress listener.
//!
//! Marketplace code calls [`EventPublisher::publish`] right after it commits
//! an RFQ or quotation change. Each call opens a fresh connection, writes one
//! payload, and closes. Failures are logged and swallowed: a hub outage must
//! never fail or noticeably slow the business operation.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write event: {0}")]
    Write(#[source] std::io::Error),

    #[error("Publishing to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

/// Pushes one payload per connection to the ingress listener
#[derive(Debug, Clone)]
pub struct EventPublisher {
    addr: String,
    timeout: Duration,
}

impl EventPublisher {
    /// `timeout` bounds connect and write together
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Publisher aimed at the configured ingress address
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.ingress_addr(), settings.producer.timeout())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Serialize `event` as JSON and deliver it, reporting any failure
    pub async fn try_publish<T: Serialize + ?Sized>(&self, event: &T) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.try_publish_raw(&payload).await
    }

    /// Deliver raw bytes, reporting any failure
    #[tracing::instrument(name = "producer.publish", skip(self, payload), fields(addr = %self.addr, bytes = payload.len()))]
    pub async fn try_publish_raw(&self, payload: &[u8]) -> Result<(), PublishError> {
        let deliver = async {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|source| PublishError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;

            stream.write_all(payload).await.map_err(PublishError::Write)?;
            // Closing the write half marks the end of the payload
            stream.shutdown().await.map_err(PublishError::Write)?;
            Ok(())
        };

        match timeout(self.timeout, deliver).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout {
                addr: self.addr.clone(),
                timeout: self.timeout,
            }),
        }
    }

    /// Best-effort publish: never fails, returns within the configured timeout
    pub async fn publish<T: Serialize + ?Sized>(&self, event: &T) {
        if let Err(e) = self.try_publish(event).await {
            tracing::warn!(addr = %self.addr, error = %e, "Event not published");
        }
    }

    /// Best-effort publish of raw bytes
    pub async fn publish_raw(&self, payload: &[u8]) {
        if let Err(e) = self.try_publish_raw(payload).await {
            tracing::warn!(addr = %self.addr, error = %e, "Event not published");
        }
    }

    /// Publish on a background task so the caller does not wait at all.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn publish_detached<T: Serialize + ?Sized>(&self, event: &T) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Event not published");
                return;
            }
        };

        let publisher = self.clone();
        tokio::spawn(async move {
            publisher.publish_raw(&payload).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::event::DomainEvent;

    async fn receiver() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    async fn read_one(listener: &TcpListener) -> Vec<u8> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    }

    /// An address nothing listens on
    async fn closed_addr() -> String {
        let (listener, addr) = receiver().await;
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_publish_raw_sends_exact_bytes() {
        let (listener, addr) = receiver().await;
        let publisher = EventPublisher::new(addr, Duration::from_secs(1));

        assert_ok!(publisher.try_publish_raw(b"New Request: Steel Pipes").await);

        assert_eq!(read_one(&listener).await, b"New Request: Steel Pipes");
    }

    #[tokio::test]
    async fn test_publish_serializes_domain_event() {
        let (listener, addr) = receiver().await;
        let publisher = EventPublisher::new(addr, Duration::from_secs(1));
        let event = DomainEvent::quotation_accepted(7, "Bulk Steel Rods");

        publisher.try_publish(&event).await.unwrap();

        let received = read_one(&listener).await;
        assert_eq!(received, event.to_json().unwrap());
    }

    #[tokio::test]
    async fn test_try_publish_reports_connect_failure() {
        let publisher = EventPublisher::new(closed_addr().await, Duration::from_secs(1));

        let err = assert_err!(publisher.try_publish_raw(b"x").await);
        assert!(matches!(err, PublishError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_publish_with_hub_down_returns_quickly() {
        let publisher = EventPublisher::new(closed_addr().await, Duration::from_secs(1));

        let start = Instant::now();
        publisher.publish(&DomainEvent::quotation_accepted(1, "Cement")).await;

        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_publish_detached_delivers() {
        let (listener, addr) = receiver().await;
        let publisher = EventPublisher::new(addr, Duration::from_secs(1));

        publisher.publish_detached(&serde_json::json!({"type": "rfq.created", "id": 4}));

        let received = tokio::time::timeout(Duration::from_secs(2), read_one(&listener))
            .await
            .unwrap();
        assert_eq!(received, br#"{"id":4,"type":"rfq.created"}"#);
    }

    #[test]
    fn test_from_settings_uses_ingress_addr() {
        let publisher = EventPublisher::from_settings(&Settings::default());
        assert_eq!(publisher.addr(), "127.0.0.1:8081");
        assert_eq!(publisher.timeout, Duration::from_secs(1));
    }
}
