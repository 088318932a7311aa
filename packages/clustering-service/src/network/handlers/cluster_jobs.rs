//! Submission, read, and invalidation handlers for per-subject cluster
//! jobs and state. Thin wrappers over C1/C2 -- no business logic here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use clustering_core::JobEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use super::AppState;

fn default_payload() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub subject_id: String,
    pub job_id: Option<String>,
    #[serde(default = "default_payload")]
    pub payload: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub status: &'static str,
}

/// `POST /internal/cluster-jobs` -- enqueues a fresh envelope onto the
/// job stream. Always 202: the worker, not this handler, decides whether
/// the subject has anything clusterable.
pub async fn submit_cluster_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<StatusCode, StatusCode> {
    let envelope = JobEnvelope::new(request.job_id, request.subject_id, request.payload);

    state.ctx.stream.publish(&envelope).await.map_err(|e| {
        warn!(error = %e, "failed to enqueue cluster job");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(StatusCode::ACCEPTED)
}

/// `GET /internal/pets/{subject_id}/clusters` -- returns the last
/// persisted `ClusterState`, or 404 if the subject has never been
/// clustered (or its entry has expired).
pub async fn read_clusters(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<JsonValue>, StatusCode> {
    let key = state.ctx.config.state_key(&subject_id);

    let body = state
        .ctx
        .state_store
        .get(&key)
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to read cluster state");
            StatusCode::SERVICE_UNAVAILABLE
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let value: JsonValue = serde_json::from_str(&body).map_err(|e| {
        warn!(error = %e, "stored cluster state is not valid JSON");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(value))
}

/// `POST /internal/pets/{subject_id}/invalidate` -- deletes the subject's
/// persisted cluster state, if any.
pub async fn invalidate_clusters(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<Json<InvalidateResponse>, StatusCode> {
    let key = state.ctx.config.state_key(&subject_id);

    let existed = state.ctx.state_store.delete(&key).await.map_err(|e| {
        warn!(error = %e, "failed to invalidate cluster state");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let status = if existed { "removed" } else { "noop" };
    Ok(Json(InvalidateResponse { status }))
}
