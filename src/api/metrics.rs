//! Prometheus metrics endpoint.

use axum::{extract::State, http::header, response::IntoResponse};

use crate::error::{AppError, Result};
use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    // Gauges that are cheaper to read on scrape than to keep in sync
    metrics::CONNECTIONS_ACTIVE.set(state.registry.len() as i64);

    let output = metrics::encode_metrics().map_err(|e| {
        AppError::Internal(format!("Failed to encode metrics: {}", e))
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    ))
}
