use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tollgate_engine::{metrics, DatasetSummary, QueryLogEntry, QueryRequest, QueryResponse};
use tollgate_policy::PolicyDescription;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

const DEFAULT_QUERYLOG_LIMIT: usize = 100;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Body of `PUT .../policies/:policy/config`
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
pub struct QueryLogParams {
    pub limit: Option<usize>,
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [("content-type", content_type)], body).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

pub async fn list_datasets(State(state): State<AppState>) -> Json<Vec<DatasetSummary>> {
    Json(state.router.list())
}

pub async fn get_dataset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<DatasetSummary> {
    Ok(Json(state.router.resolve(&name)?.summary()))
}

pub async fn execute_query(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<QueryResponse> {
    Ok(Json(state.router.execute(&name, request).await?))
}

pub async fn list_policies(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Vec<PolicyDescription>> {
    Ok(Json(state.router.policies(&name)?))
}

pub async fn set_policy_config(
    State(state): State<AppState>,
    Path((name, policy)): Path<(String, String)>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<PolicyDescription> {
    Ok(Json(state.router.set_policy_config(
        &name,
        &policy,
        &update.key,
        update.value,
    )?))
}

pub async fn reset_policy_config(
    State(state): State<AppState>,
    Path((name, policy)): Path<(String, String)>,
) -> ApiResult<PolicyDescription> {
    Ok(Json(state.router.reset_policy_config(&name, &policy)?))
}

pub async fn reset_policy_state(
    State(state): State<AppState>,
    Path((name, policy)): Path<(String, String)>,
) -> ApiResult<PolicyDescription> {
    Ok(Json(state.router.reset_policy_state(&name, &policy)?))
}

pub async fn reload_dataset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Value> {
    let dataset = state.router.reload_from_disk(&name)?;
    info!(dataset = %name, "Reloaded dataset via admin API");
    Ok(Json(json!({
        "reloaded": name,
        "policies": dataset.summary().allocation_policies,
    })))
}

pub async fn recent_queries(
    State(state): State<AppState>,
    Query(params): Query<QueryLogParams>,
) -> Json<Vec<QueryLogEntry>> {
    Json(
        state
            .router
            .query_log()
            .recent(params.limit.unwrap_or(DEFAULT_QUERYLOG_LIMIT)),
    )
}
