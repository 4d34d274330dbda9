use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::metrics::ConnectionMetrics;
use crate::registry::ConnectionHandle;
use crate::server::AppState;

use super::message::OutboundFrame;

/// How long the writer may take to flush and close once the reader is done
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
///
/// Malformed handshakes are rejected by the `WebSocketUpgrade` extractor before
/// this runs, so nothing is registered for them.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, peer), fields(peer = %peer))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    tracing::debug!("WebSocket upgrade requested");

    ws.on_failed_upgrade(move |e| {
        tracing::warn!(peer = %peer, error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| handle_socket(socket, state, peer))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, peer),
    fields(peer = %peer, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let _socket_guard = state.registry.open_socket();
    let connection_start = Instant::now();

    // Create channel for sending frames to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.settings.websocket.outbound_buffer.max(1));

    // New subscribers only see events broadcast from here on
    let handle = state.registry.register(tx, Some(peer));
    let connection_id = handle.id;
    ConnectionMetrics::record_opened();

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing queued frames to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let kind = frame.kind();
            let closing = matches!(frame, OutboundFrame::Close { .. });
            if let Err(e) = ws_sender.send(to_message(frame)).await {
                tracing::debug!(connection_id = %connection_id, frame = kind, error = %e, "WebSocket write failed");
                return;
            }
            if closing {
                return;
            }
        }
        // Queue closed: the connection was unregistered
        let _ = ws_sender.close().await;
    });

    // Task for draining frames sent by the client
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_handle) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %recv_handle.id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            // Closing the queue lets the writer flush and send its close frame
            state.registry.unregister(connection_id);
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    // Unregister connection (no-op if a failed write or shutdown already did)
    state.registry.unregister(connection_id);

    let duration = connection_start.elapsed();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration.as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Convert a queued frame to a WebSocket message
fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Event(event) => match event.as_text() {
            Some(text) => Message::Text(text.to_owned().into()),
            None => Message::Binary(event.payload().clone()),
        },
        OutboundFrame::Ping => Message::Ping(Bytes::new()),
        OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
fn process_message(msg: Message, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();
            ConnectionMetrics::record_frame("text");
            // Clients have nothing to say to the hub; log and move on
            tracing::debug!(
                connection_id = %handle.id,
                message = %text.as_str(),
                "Ignoring client text message"
            );
            true
        }
        Message::Binary(data) => {
            handle.update_activity();
            ConnectionMetrics::record_frame("binary");
            tracing::debug!(
                connection_id = %handle.id,
                bytes = data.len(),
                "Ignoring client binary message"
            );
            true
        }
        Message::Ping(_) => {
            // Axum answers pings automatically
            handle.update_activity();
            ConnectionMetrics::record_frame("ping");
            true
        }
        Message::Pong(_) => {
            handle.update_activity();
            ConnectionMetrics::record_frame("pong");
            true
        }
        Message::Close(_) => {
            ConnectionMetrics::record_frame("close");
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}
