//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCAST_LATENCY, CONNECTIONS_ACTIVE, CONNECTIONS_EVICTED_TOTAL, DELIVERIES_TOTAL,
    DELIVERY_FAILURES_TOTAL, EVENTS_BROADCAST_TOTAL, HEARTBEAT_DURATION_MS,
    INGRESS_CONNECTIONS_TOTAL, INGRESS_OUTCOMES_TOTAL, INGRESS_PAYLOAD_BYTES,
    STALE_CONNECTIONS_REMOVED, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION, WS_FRAMES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording subscriber connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }

    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    pub fn record_frame(kind: &str) {
        WS_FRAMES_RECEIVED.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for recording ingress metrics
pub struct IngressMetrics;

impl IngressMetrics {
    pub fn record_accepted() {
        INGRESS_CONNECTIONS_TOTAL.inc();
    }

    pub fn record_outcome(outcome: &str) {
        INGRESS_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_payload_size(bytes: usize) {
        INGRESS_PAYLOAD_BYTES.observe(bytes as f64);
    }
}

/// Helper struct for recording broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_broadcast(delivered: usize, elapsed: Duration) {
        EVENTS_BROADCAST_TOTAL.inc();
        DELIVERIES_TOTAL.inc_by(delivered as u64);
        BROADCAST_LATENCY.observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(reason: &str) {
        DELIVERY_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_evicted() {
        CONNECTIONS_EVICTED_TOTAL.inc();
    }
}

/// Helper struct for recording heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_stale_removed(count: usize) {
        STALE_CONNECTIONS_REMOVED.inc_by(count as u64);
    }
}
