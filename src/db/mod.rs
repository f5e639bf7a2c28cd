//! Database layer for crawl-orchestrator
//!
//! Optional SQLite persistence for tasks and their items. The in-memory
//! registry stays authoritative while a task runs; the store exists so terminal
//! tasks survive a restart and interrupted ones can be recognised.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`tasks`] - Task and item CRUD, startup recovery, eviction

use crate::config::TaskConfig;
use crate::types::{ItemErrorKind, ItemOutcome, TaskId, TaskStatus, WorkItem};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;

/// New task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    /// Task id
    pub id: TaskId,
    /// Seed target
    pub seed: &'a str,
    /// Configuration fixed at submission
    pub config: &'a TaskConfig,
    /// Submission time
    pub created_at: DateTime<Utc>,
}

/// Status and counters written on every transition
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    /// Task id
    pub id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// Items discovered by expansion
    pub total_items: usize,
    /// Items that succeeded
    pub succeeded_items: usize,
    /// Items that failed
    pub failed_items: usize,
    /// Items skipped
    pub skipped_items: usize,
    /// Task-level error
    pub error: Option<String>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// When items started executing
    pub started_at: Option<DateTime<Utc>>,
    /// When the task turned terminal
    pub completed_at: Option<DateTime<Utc>>,
}

/// Task record from database
///
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task id (UUID text)
    pub id: String,
    /// Seed target
    pub seed: String,
    /// Status (`TaskStatus::as_str` form)
    pub status: String,
    /// Task configuration as JSON
    pub config: String,
    /// Items discovered by expansion
    pub total_items: i64,
    /// Items that succeeded
    pub succeeded_items: i64,
    /// Items that failed
    pub failed_items: i64,
    /// Items skipped
    pub skipped_items: i64,
    /// Task-level error
    pub error: Option<String>,
    /// Submission time
    pub created_at: i64,
    /// Last mutation time
    pub updated_at: i64,
    /// When items started executing
    pub started_at: Option<i64>,
    /// When the task turned terminal
    pub completed_at: Option<i64>,
}

impl TaskRow {
    /// Parsed task id
    pub fn task_id(&self) -> Option<TaskId> {
        self.id.parse().ok()
    }

    /// Parsed status, `None` if the column holds an unknown value
    pub fn task_status(&self) -> Option<TaskStatus> {
        self.status.parse().ok()
    }
}

/// Item record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskItemRow {
    /// Owning task id
    pub task_id: String,
    /// Index of the item within its task
    pub position: i64,
    /// Item target
    pub target: String,
    /// Discovery depth
    pub depth: i64,
    /// Outcome (`ItemOutcome::as_str` form)
    pub outcome: String,
    /// Attempts made
    pub attempts: i64,
    /// Failure classification
    pub error_kind: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// Payload as JSON
    pub payload: Option<String>,
    /// When the latest attempt started
    pub last_attempt_at: Option<i64>,
}

impl From<TaskItemRow> for WorkItem {
    fn from(row: TaskItemRow) -> Self {
        WorkItem {
            target: row.target,
            depth: row.depth.max(0) as u32,
            attempt_count: row.attempts.max(0) as u32,
            outcome: row.outcome.parse().unwrap_or(ItemOutcome::Pending),
            error_kind: row
                .error_kind
                .as_deref()
                .and_then(|kind| kind.parse::<ItemErrorKind>().ok()),
            error: row.error,
            result_payload: row
                .payload
                .as_deref()
                .and_then(|payload| serde_json::from_str(payload).ok()),
            last_attempt_at: row.last_attempt_at.map(from_millis),
        }
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Database handle for crawl-orchestrator
#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
