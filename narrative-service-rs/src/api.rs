//! HTTP boundary for submitting and polling narrative tasks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use config_rs::PipelineConfig;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::manager::{SubmitRequest, TaskManager};
use crate::store::{SearchMode, TaskPage};
use crate::task::NarrativeTask;

/// Largest accepted request body (10 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub pipeline: PipelineConfig,
}

impl AppState {
    pub fn new(manager: Arc<TaskManager>, pipeline: PipelineConfig) -> Self {
        Self { manager, pipeline }
    }
}

/// Error body: `{status: "error", error: <code>, detail?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, detail: Option<String>) -> Self {
        Self { status, code, detail }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status = match &err {
            TaskError::InvalidRequest(_) | TaskError::InvalidIncident(_) | TaskError::EmptyQuery => {
                StatusCode::BAD_REQUEST
            }
            TaskError::NotFound(_) => StatusCode::NOT_FOUND,
            TaskError::DurableNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            TaskError::Creation(_)
            | TaskError::Lookup(_)
            | TaskError::ListFailed(_)
            | TaskError::SearchFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.error_code(), Some(err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "status": "error", "error": self.code });
        if let Some(detail) = self.detail {
            body["detail"] = json!(detail);
        }
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct PageResponse {
    status: &'static str,
    total: usize,
    limit: usize,
    offset: usize,
    items: Vec<NarrativeTask>,
}

impl PageResponse {
    fn new(page: TaskPage, limit: usize, offset: usize) -> Self {
        Self {
            status: "ok",
            total: page.total,
            limit,
            offset,
            items: page.tasks,
        }
    }
}

fn param_or(params: &HashMap<String, String>, name: &str, default: usize, allow_zero: bool) -> usize {
    match params.get(name).map(|raw| raw.trim().parse::<usize>()) {
        Some(Ok(value)) if value > 0 || allow_zero => value,
        Some(_) => {
            debug!(param = name, "invalid paging parameter, using default");
            default
        }
        None => default,
    }
}

fn paging(params: &HashMap<String, String>) -> (usize, usize) {
    (
        param_or(params, "limit", DEFAULT_LIMIT, false),
        param_or(params, "offset", 0, true),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/narrative/rca_analyze_async", post(submit_handler))
        .route("/api/v1/narrative/rca_analyze/:task_id", get(status_handler))
        .route("/api/v1/narrative/history", get(history_handler))
        .route("/api/v1/narrative/history/search", get(search_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_PAYLOAD_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "narrative-service",
        "durableStore": state.manager.has_durable_store(),
    }))
}

async fn submit_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|err| {
        warn!(error = %err, "rejecting malformed submission body");
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_json_payload",
            Some(err.to_string()),
        )
    })?;
    let request: SubmitRequest = serde_json::from_value(value)
        .map_err(|err| ApiError::from(TaskError::InvalidRequest(err.to_string())))?;

    let accepted = state
        .manager
        .submit(request, state.pipeline.clone())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<NarrativeTask>, ApiError> {
    let task = state.manager.get_task(&task_id).await?;
    Ok(Json(task))
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = paging(&params);
    let page = state.manager.list_tasks(limit, offset).await?;
    Ok(Json(PageResponse::new(page, limit, offset)))
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = paging(&params);
    let query = params.get("q").map(String::as_str).unwrap_or_default();
    let mode = match params.get("mode") {
        Some(raw) => raw.parse::<SearchMode>().unwrap_or_else(|err| {
            debug!(error = %err, "falling back to the default search mode");
            SearchMode::default()
        }),
        None => SearchMode::default(),
    };
    let page = state
        .manager
        .search_tasks(query, mode, limit, offset)
        .await?;
    Ok(Json(PageResponse::new(page, limit, offset)))
}
