//! Operational HTTP endpoints served next to the WebSocket route.

mod health;
mod metrics;
mod routes;

pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
