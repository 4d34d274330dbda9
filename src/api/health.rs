//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::broadcast::BroadcasterStatsSnapshot;
use crate::ingress::IngressStatsSnapshot;
use crate::registry::RegistryStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub broadcaster: BroadcasterStatsSnapshot,
    pub ingress: IngressStatsSnapshot,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.registry.len(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        registry: state.registry.stats(),
        broadcaster: state.broadcaster.stats(),
        ingress: state.ingress_stats.snapshot(),
    })
}
