//! Task handlers: submission, progress, results and cancellation.

use super::{CancelTaskResponse, ListTasksQuery, ResultsQuery, SubmitTaskRequest, SubmitTaskResponse};
use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{TaskId, TaskStatus};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Parse a path id, answering 400 for anything that is not a UUID
fn parse_task_id(raw: &str) -> std::result::Result<TaskId, Response> {
    raw.parse::<TaskId>().map_err(|_| {
        ApiError::validation(format!("invalid task id: {}", raw)).into_response()
    })
}

/// POST /tasks - Submit a task
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = SubmitTaskRequest,
    responses(
        (status = 202, description = "Task accepted", body = SubmitTaskResponse),
        (status = 400, description = "Invalid task configuration", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Response {
    let config = request
        .config
        .unwrap_or_else(|| state.config.task_defaults.clone());

    match state.orchestrator.submit(config, request.seed).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(SubmitTaskResponse {
                task_id,
                status: TaskStatus::Pending,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /tasks - List tasks, newest first
#[utoipa::path(
    get,
    path = "/tasks",
    tag = "tasks",
    params(
        ("status" = Option<TaskStatus>, Query, description = "Only tasks with this status"),
        ("limit" = Option<usize>, Query, description = "Maximum number of tasks to return (default: 100)")
    ),
    responses(
        (status = 200, description = "Task snapshots", body = Vec<crate::types::ProgressSnapshot>),
        (status = 400, description = "Invalid query parameters")
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> impl IntoResponse {
    Json(state.orchestrator.list_tasks(query.status, query.limit))
}

/// GET /tasks/:id - Progress snapshot
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Current progress", body = crate::types::ProgressSnapshot),
        (status = 400, description = "Malformed task ID", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError)
    )
)]
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.orchestrator.get_status(id) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /tasks/:id/results - Result bundle
#[utoipa::path(
    get,
    path = "/tasks/{id}/results",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID"),
        ("include_errors" = Option<bool>, Query, description = "Include failed and skipped items"),
        ("accept_partial" = Option<bool>, Query, description = "Return settled results of a running task")
    ),
    responses(
        (status = 200, description = "Results", body = crate::types::ResultBundle),
        (status = 400, description = "Malformed task ID", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 409, description = "Task not finished", body = crate::error::ApiError)
    )
)]
pub async fn get_task_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state
        .orchestrator
        .get_results(id, query.include_errors, query.accept_partial)
    {
        Ok(bundle) => (StatusCode::OK, Json(bundle)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /tasks/:id/cancel - Request cancellation
///
/// Also mounted as `DELETE /tasks/:id`.
#[utoipa::path(
    post,
    path = "/tasks/{id}/cancel",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Cancellation outcome", body = CancelTaskResponse),
        (status = 400, description = "Malformed task ID", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError)
    )
)]
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(e) = state.orchestrator.get_status(id) {
        return e.into_response();
    }

    let cancelled = state.orchestrator.cancel(id);
    (StatusCode::OK, Json(CancelTaskResponse { cancelled })).into_response()
}
