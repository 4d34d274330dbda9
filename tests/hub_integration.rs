//! End-to-end tests against a running hub
//!
//! Each test binds both listeners on ephemeral loopback ports, publishes
//! through the real producer adapter, and reads with real WebSocket clients.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rfq_event_hub::config::Settings;
use rfq_event_hub::error::Result as HubResult;
use rfq_event_hub::event::DomainEvent;
use rfq_event_hub::producer::EventPublisher;
use rfq_event_hub::server::{AppState, HubServer};
use rfq_event_hub::shutdown::ShutdownResult;
use rfq_event_hub::subscriber::{BackoffConfig, Subscriber, SubscriberConfig};

const TIMEOUT: Duration = Duration::from_secs(3);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    public: SocketAddr,
    ingress: SocketAddr,
    state: AppState,
    trigger: Option<oneshot::Sender<()>>,
    handle: JoinHandle<HubResult<ShutdownResult>>,
}

impl TestHub {
    async fn start() -> Self {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 0;
        settings.ingress.port = 0;
        settings.ingress.read_timeout_ms = 200;
        settings.shutdown.drain_timeout_ms = 1000;
        // Ordering tests publish bursts faster than a subscriber may drain them
        settings.websocket.outbound_buffer = 1024;

        let hub = HubServer::bind(settings).await.unwrap();
        let public = hub.public_addr().unwrap();
        let ingress = hub.ingress_addr().unwrap();
        let state = hub.state().clone();

        let (trigger, stop) = oneshot::channel::<()>();
        let handle = tokio::spawn(hub.run(async move {
            let _ = stop.await;
        }));

        Self {
            public,
            ingress,
            state,
            trigger: Some(trigger),
            handle,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.public)
    }

    fn publisher(&self) -> EventPublisher {
        EventPublisher::new(self.ingress.to_string(), Duration::from_secs(1))
    }

    /// Connect a subscriber and wait until the hub has registered it
    async fn connect(&self) -> WsStream {
        let before = self.state.registry.len();
        let (ws, _) = connect_async(self.ws_url()).await.unwrap();
        self.wait_for_connections(before + 1).await;
        ws
    }

    async fn wait_for_connections(&self, expected: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while self.state.registry.len() != expected {
            assert!(
                Instant::now() < deadline,
                "expected {} connections, have {}",
                expected,
                self.state.registry.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(mut self) -> ShutdownResult {
        if let Some(trigger) = self.trigger.take() {
            let _ = trigger.send(());
        }
        timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("hub should stop")
            .expect("hub task should not panic")
            .expect("hub should shut down cleanly")
    }
}

/// Next data frame, skipping control frames
async fn next_payload(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("frame should arrive")
            .expect("stream open")
            .expect("frame ok");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_text(ws: &mut WsStream) -> String {
    match next_payload(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

/// True if no data frame arrives within `wait`
async fn stays_quiet(ws: &mut WsStream, wait: Duration) -> bool {
    match timeout(wait, ws.next()).await {
        Err(_) => true,
        Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => true,
        Ok(_) => false,
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(TIMEOUT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_broadcast_reaches_live_subscribers_and_drops_broken_one() {
    let hub = TestHub::start().await;
    let mut a = hub.connect().await;
    let mut b = hub.connect().await;
    let c = hub.connect().await;

    // C goes away without a close handshake
    drop(c);
    hub.wait_for_connections(2).await;

    let payload = r#"{"type":"quotation.accepted","rfqId":7,"message":"Quote Accepted for: Bulk Steel Rods"}"#;
    hub.publisher().try_publish_raw(payload.as_bytes()).await.unwrap();

    assert_eq!(next_text(&mut a).await, payload);
    assert_eq!(next_text(&mut b).await, payload);
    assert_eq!(hub.state.registry.len(), 2);

    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_events_arrive_in_ingress_order() {
    let hub = TestHub::start().await;
    let mut a = hub.connect().await;
    let mut b = hub.connect().await;
    let publisher = hub.publisher();

    // Each publish completes before the next producer connects
    for i in 0..300u32 {
        publisher.try_publish_raw(format!("E{}", i).as_bytes()).await.unwrap();
    }

    for ws in [&mut a, &mut b] {
        let mut received = Vec::with_capacity(300);
        for _ in 0..300 {
            let text = next_text(ws).await;
            let seq: u32 = text.trim_start_matches('E').parse().unwrap();
            received.push(seq);
        }
        let inversions: Vec<(u32, u32)> = received
            .windows(2)
            .filter(|pair| pair[1] < pair[0])
            .map(|pair| (pair[0], pair[1]))
            .collect();
        assert!(inversions.is_empty(), "out of order: {:?}", inversions);
        assert_eq!(received, (0..300).collect::<Vec<_>>());
    }

    hub.stop().await;
}

#[tokio::test]
async fn test_late_subscriber_gets_no_backlog() {
    let hub = TestHub::start().await;
    let mut early = hub.connect().await;
    let publisher = hub.publisher();

    publisher.try_publish_raw(b"before").await.unwrap();
    assert_eq!(next_text(&mut early).await, "before");

    let mut late = hub.connect().await;
    publisher.try_publish_raw(b"after").await.unwrap();

    assert_eq!(next_text(&mut late).await, "after");
    assert_eq!(next_text(&mut early).await, "after");

    hub.stop().await;
}

#[tokio::test]
async fn test_broadcast_with_no_subscribers_is_a_no_op() {
    let hub = TestHub::start().await;

    hub.publisher().try_publish_raw(b"nobody listening").await.unwrap();

    let deadline = Instant::now() + TIMEOUT;
    while hub.state.broadcaster.stats().events == 0 {
        assert!(Instant::now() < deadline, "event was never broadcast");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hub.state.broadcaster.stats().delivered, 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_binary_payload_is_sent_as_binary_frame() {
    let hub = TestHub::start().await;
    let mut a = hub.connect().await;

    hub.publisher().try_publish_raw(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    match next_payload(&mut a).await {
        Message::Binary(data) => assert_eq!(&data[..], &[0xde, 0xad, 0xbe, 0xef]),
        other => panic!("expected binary frame, got {:?}", other),
    }

    hub.stop().await;
}

#[tokio::test]
async fn test_silent_producer_forwards_nothing() {
    let hub = TestHub::start().await;
    let mut a = hub.connect().await;

    let _silent = TcpStream::connect(hub.ingress).await.unwrap();

    assert!(stays_quiet(&mut a, Duration::from_millis(500)).await);
    assert_eq!(hub.state.ingress_stats.snapshot().timed_out, 1);
    assert_eq!(hub.state.broadcaster.stats().events, 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_publish_with_hub_down_returns_quickly() {
    let hub = TestHub::start().await;
    let publisher = hub.publisher();
    hub.stop().await;

    let start = Instant::now();
    publisher
        .publish(&DomainEvent::quotation_accepted(7, "Bulk Steel Rods"))
        .await;

    assert!(start.elapsed() < Duration::from_millis(1500));
    assert!(publisher.try_publish_raw(b"x").await.is_err());
}

#[tokio::test]
async fn test_plain_http_request_is_not_registered() {
    let hub = TestHub::start().await;

    let response = http_get(hub.public, "/ws").await;

    assert!(response.starts_with("HTTP/1.1 4"), "unexpected response: {}", response);
    assert!(hub.state.registry.is_empty());

    hub.stop().await;
}

#[tokio::test]
async fn test_bare_host_path_accepts_websocket() {
    let hub = TestHub::start().await;

    let (mut ws, _) = connect_async(format!("ws://{}/", hub.public)).await.unwrap();
    hub.wait_for_connections(1).await;

    hub.publisher().try_publish_raw(b"New Request: Cement").await.unwrap();
    assert_eq!(next_text(&mut ws).await, "New Request: Cement");

    hub.stop().await;
}

#[tokio::test]
async fn test_health_endpoint_reports_connections() {
    let hub = TestHub::start().await;
    let _a = hub.connect().await;

    let response = http_get(hub.public, "/health").await;

    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);
    assert!(response.contains(r#""status":"healthy""#));
    assert!(response.contains(r#""connections":1"#));

    hub.stop().await;
}

#[tokio::test]
async fn test_shutdown_sends_going_away_close_frame() {
    let hub = TestHub::start().await;
    let mut a = hub.connect().await;

    let stopping = tokio::spawn(hub.stop());

    match next_payload(&mut a).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }
    // Finish the close handshake so the hub's socket task can exit
    let _ = a.close(None).await;

    let result = stopping.await.unwrap();
    assert_eq!(result.connections_closed, 1);
    assert!(result.sockets_drained);
}

#[tokio::test]
async fn test_subscriber_client_receives_domain_events() {
    let hub = TestHub::start().await;
    let (events_tx, mut events_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let config = SubscriberConfig {
        url: hub.ws_url(),
        connect_timeout: Duration::from_secs(1),
        backoff: BackoffConfig::fixed(Duration::from_millis(50)),
    };
    let subscriber = tokio::spawn(Subscriber::new(config, events_tx, shutdown_rx).run());
    hub.wait_for_connections(1).await;

    let event = DomainEvent::quotation_accepted(7, "Bulk Steel Rods");
    hub.publisher().publish(&event).await;

    let received = timeout(TIMEOUT, events_rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.as_bytes(), &event.to_json().unwrap()[..]);

    shutdown_tx.send(()).unwrap();
    let stats = timeout(TIMEOUT, subscriber).await.unwrap().unwrap();
    assert_eq!(stats.events, 1);

    hub.stop().await;
}
