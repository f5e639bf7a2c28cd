//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] - Submission, progress, results and cancellation
//! - [`system`] - Health, events, OpenAPI

use crate::config::TaskConfig;
use crate::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

mod system;
mod tasks;

pub use system::*;
pub use tasks::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Request body for POST /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitTaskRequest {
    /// Seed target the task expands from (e.g. a site's front page)
    pub seed: String,
    /// Per-task settings; the server's `task_defaults` apply when omitted
    #[serde(default)]
    pub config: Option<TaskConfig>,
}

/// Response for POST /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitTaskResponse {
    /// Id to poll
    pub task_id: TaskId,
    /// Always `pending` at submission
    pub status: TaskStatus,
}

/// Query parameters for GET /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ListTasksQuery {
    /// Only tasks with this status
    pub status: Option<TaskStatus>,
    /// Maximum number of tasks to return (default: 100)
    pub limit: Option<usize>,
}

/// Query parameters for GET /tasks/:id/results
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ResultsQuery {
    /// Include failed and skipped items (default: false)
    #[serde(default)]
    pub include_errors: bool,
    /// Answer with what has settled so far if the task is still running
    /// and was submitted with `partial_results_ok` (default: false)
    #[serde(default)]
    pub accept_partial: bool,
}

/// Response for POST /tasks/:id/cancel and DELETE /tasks/:id
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CancelTaskResponse {
    /// `false` when the task was already terminal
    pub cancelled: bool,
}
