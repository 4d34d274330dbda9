use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::event::Event;

use super::backoff::{BackoffConfig, ExponentialBackoff};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// e.g. `ws://127.0.0.1:8082/ws`
    pub url: String,
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl SubscriberConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Totals returned when a subscriber stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberStats {
    pub connections: u64,
    pub events: u64,
}

enum SessionEnd {
    Shutdown,
    Disconnected,
    ReceiverGone,
}

/// Stays subscribed to a hub, reconnecting after every drop.
///
/// Events missed while disconnected are not recovered; the hub keeps no
/// backlog.
pub struct Subscriber {
    config: SubscriberConfig,
    events: mpsc::Sender<Event>,
    shutdown: broadcast::Receiver<()>,
}

impl Subscriber {
    pub fn new(
        config: SubscriberConfig,
        events: mpsc::Sender<Event>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            events,
            shutdown,
        }
    }

    /// Run until shutdown or until the event receiver is dropped
    pub async fn run(mut self) -> SubscriberStats {
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());
        let mut stats = SubscriberStats::default();

        tracing::info!(url = %self.config.url, "Subscriber started");

        loop {
            let connect = timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()));

            let connected = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = connect => result,
            };

            match connected {
                Ok(Ok((ws, _response))) => {
                    backoff.reset();
                    stats.connections += 1;
                    tracing::info!(url = %self.config.url, "Subscriber connected");

                    match stream_events(ws, &self.events, &mut self.shutdown, &mut stats).await {
                        SessionEnd::Shutdown | SessionEnd::ReceiverGone => break,
                        SessionEnd::Disconnected => {
                            tracing::warn!(url = %self.config.url, "Subscriber disconnected");
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(url = %self.config.url, error = %e, "Subscriber connect failed");
                }
                Err(_) => {
                    tracing::warn!(
                        url = %self.config.url,
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "Subscriber connect timed out"
                    );
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after delay"
            );

            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(
            connections = stats.connections,
            events = stats.events,
            "Subscriber stopped"
        );
        stats
    }
}

/// Forward payloads from one connection until it drops
async fn stream_events(
    ws: WsStream,
    events: &mpsc::Sender<Event>,
    shutdown: &mut broadcast::Receiver<()>,
    stats: &mut SubscriberStats,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        let msg = tokio::select! {
            _ = shutdown.recv() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            msg = ws_rx.next() => msg,
        };

        let payload = match msg {
            Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => data,
            // Pongs are queued by tungstenite and flushed on the next read
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                continue
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(close_frame = ?frame, "Hub closed the connection");
                return SessionEnd::Disconnected;
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Subscriber read failed");
                return SessionEnd::Disconnected;
            }
            None => return SessionEnd::Disconnected,
        };

        stats.events += 1;
        if events.send(Event::new(payload)).await.is_err() {
            let _ = ws_tx.send(Message::Close(None)).await;
            return SessionEnd::ReceiverGone;
        }
    }
}
