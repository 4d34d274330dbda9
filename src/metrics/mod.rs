//! Prometheus metrics for the event hub.
//!
//! - Connection metrics (active subscribers, opened/closed, lifetime)
//! - Ingress metrics (producer connections and their outcomes)
//! - Broadcast metrics (events, deliveries, failures, evictions, fan-out latency)
//! - Heartbeat metrics

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, HeartbeatMetrics, IngressMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "rfq_hub";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently in the registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of subscriber connections eligible for broadcasts"
    ).unwrap();

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Frames received from subscribers, by frame type
    pub static ref WS_FRAMES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_frames_received_total", METRIC_PREFIX),
        "Total WebSocket frames received from subscribers",
        &["type"]
    ).unwrap();

    // ============================================================================
    // Ingress Metrics
    // ============================================================================

    /// Producer connections accepted
    pub static ref INGRESS_CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ingress_connections_total", METRIC_PREFIX),
        "Total producer connections accepted on the ingress listener"
    ).unwrap();

    /// Producer connection outcomes
    pub static ref INGRESS_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ingress_outcomes_total", METRIC_PREFIX),
        "Producer connection outcomes",
        &["outcome"]
    ).unwrap();

    /// Size of forwarded payloads
    pub static ref INGRESS_PAYLOAD_BYTES: Histogram = register_histogram!(
        format!("{}_ingress_payload_bytes", METRIC_PREFIX),
        "Size in bytes of forwarded ingress payloads",
        vec![64.0, 128.0, 256.0, 512.0, 1024.0, 4096.0, 16384.0, 65536.0]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Events fanned out
    pub static ref EVENTS_BROADCAST_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_broadcast_total", METRIC_PREFIX),
        "Total events broadcast"
    ).unwrap();

    /// Frames queued to subscribers
    pub static ref DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total event frames queued to subscriber connections"
    ).unwrap();

    /// Failed writes by reason
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total failed writes to subscriber connections",
        &["reason"]
    ).unwrap();

    /// Connections removed because a write failed
    pub static ref CONNECTIONS_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_evicted_total", METRIC_PREFIX),
        "Total connections unregistered after a failed write"
    ).unwrap();

    /// Time spent fanning one event out to every connection
    pub static ref BROADCAST_LATENCY: Histogram = register_histogram!(
        format!("{}_broadcast_latency_seconds", METRIC_PREFIX),
        "Broadcast fan-out latency in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]
    ).unwrap();

    /// Connections removed for inactivity
    pub static ref STALE_CONNECTIONS_REMOVED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_removed_total", METRIC_PREFIX),
        "Total connections removed after exceeding the idle timeout"
    ).unwrap();
}
