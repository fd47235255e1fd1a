use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use crm_sync::{StartError, SyncJob, SyncScope};
use serde::Deserialize;
use serde_json::json;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StartSyncRequest {
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

/// The body is optional: an empty body starts a full sync.
fn parse_start_request(body: &[u8]) -> ApiResult<StartSyncRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartSyncRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            format!("invalid request body: {err}"),
        )
    })
}

pub(crate) async fn start_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SyncJob>)> {
    let request = parse_start_request(&body)?;
    let scope = SyncScope::from_request(request.resource_type.as_deref()).map_err(|err| {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_SYNC_TYPE", err.to_string())
    })?;

    match state.controller.start(scope).await {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        Err(StartError::AlreadyRunning(current)) => Err(ApiError::new(
            StatusCode::CONFLICT,
            "SYNC_IN_PROGRESS",
            "a sync is already in progress",
        )
        .with_details(json!(current))),
    }
}

pub(crate) async fn sync_status(State(state): State<AppState>) -> Json<SyncJob> {
    Json(state.controller.status().await)
}

pub(crate) async fn stop_sync(State(state): State<AppState>) -> Json<SyncJob> {
    Json(state.controller.stop().await)
}
