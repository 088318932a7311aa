//! Health, liveness, readiness, and stream-reachability handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// `GET /healthz` -- always returns 200. The `state` field indicates
/// whether the server is actually healthy, letting monitoring tools
/// distinguish "up but draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "status": "ok",
        "state": health.as_str(),
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Kubernetes liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe -- returns 200 when ready, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /internal/health/stream` -- 200 if the job stream answers
/// `ensure_group`, 503 otherwise.
pub async fn stream_health_handler(State(state): State<AppState>) -> StatusCode {
    match state.ctx.stream.ensure_group().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
