//! OpenAPI documentation and schema generation
//!
//! The specification is generated at compile time by utoipa from the handler
//! annotations and served at `/openapi.json`.

use utoipa::OpenApi;

/// OpenAPI documentation for the crawl-orchestrator REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "crawl-orchestrator REST API",
        version = "0.1.0",
        description = "Submit batched crawl tasks, poll their progress and collect results",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Tasks
        crate::api::routes::submit_task,
        crate::api::routes::list_tasks,
        crate::api::routes::get_task,
        crate::api::routes::get_task_results,
        crate::api::routes::cancel_task,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::TaskStatus,
        crate::types::ItemOutcome,
        crate::types::ItemErrorKind,
        crate::types::WorkItem,
        crate::types::ProgressSnapshot,
        crate::types::Coverage,
        crate::types::ItemResult,
        crate::types::ItemFailure,
        crate::types::ResultSummary,
        crate::types::ResultBundle,
        crate::types::ErrorStats,
        crate::types::HealthStatus,
        crate::types::HealthReport,
        crate::types::Event,

        // Config types from config.rs
        crate::config::TaskConfig,

        // API request/response types from routes
        crate::api::routes::SubmitTaskRequest,
        crate::api::routes::SubmitTaskResponse,
        crate::api::routes::ListTasksQuery,
        crate::api::routes::ResultsQuery,
        crate::api::routes::CancelTaskResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "tasks", description = "Task submission, progress polling, results and cancellation"),
        (name = "system", description = "System endpoints - Health report, OpenAPI spec, events"),
    )
)]
pub struct ApiDoc;
