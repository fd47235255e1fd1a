use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use crm_sync::{ListQuery, RecordPage, ResourceType};

use crate::{ApiError, ApiResult, AppState};

async fn list(
    state: &AppState,
    resource: ResourceType,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<RecordPage>> {
    let Query(query) = query.map_err(|err| {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_QUERY", err.body_text())
    })?;
    let page = state.records.list(resource, &query).await?;
    Ok(Json(page))
}

pub(crate) async fn list_contacts(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<RecordPage>> {
    list(&state, ResourceType::Customers, query).await
}

pub(crate) async fn list_orders(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<RecordPage>> {
    list(&state, ResourceType::Orders, query).await
}

pub(crate) async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<RecordPage>> {
    list(&state, ResourceType::Products, query).await
}
