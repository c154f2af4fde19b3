//! HTTP handlers for the gateway server

use std::sync::Arc;

use axum::{extract::State, response::Json};
use tracing::trace;

use super::state::{GatewayState, HealthReport};

/// Health check endpoint: backend states and attached client count
pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<HealthReport> {
    trace!("[Gateway] Health check");
    Json(state.health())
}
