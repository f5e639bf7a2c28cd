//! Core types and events for crawl-orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::WorkError;

/// Unique identifier for a task, generated at submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status
///
/// `Completed`, `Failed`, `PartiallyCompleted` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, waiting for a slot or still expanding
    Pending,
    /// Items are being executed
    Running,
    /// Every item succeeded
    Completed,
    /// Nothing usable came out of the task
    Failed,
    /// Some items succeeded and some did not
    PartiallyCompleted,
    /// Cancelled by request
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::PartiallyCompleted,
        TaskStatus::Cancelled,
    ];

    /// Whether no further transition can happen
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(
                next,
                TaskStatus::Running | TaskStatus::Failed | TaskStatus::Cancelled
            ),
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Stable string form, used on the wire and in the database
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::PartiallyCompleted => "partially_completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

/// Outcome of a single work item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Not settled yet
    #[default]
    Pending,
    /// Produced a payload
    Success,
    /// Gave up after a permanent error or exhausted retries
    Failed,
    /// Never attempted because the target's circuit was open
    Skipped,
}

impl ItemOutcome {
    /// All outcomes
    pub const ALL: [ItemOutcome; 4] = [
        ItemOutcome::Pending,
        ItemOutcome::Success,
        ItemOutcome::Failed,
        ItemOutcome::Skipped,
    ];

    /// Whether the item has settled
    pub fn is_settled(self) -> bool {
        self != ItemOutcome::Pending
    }

    /// Stable string form, used in the database
    pub fn as_str(self) -> &'static str {
        match self {
            ItemOutcome::Pending => "pending",
            ItemOutcome::Success => "success",
            ItemOutcome::Failed => "failed",
            ItemOutcome::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for ItemOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemOutcome::ALL
            .into_iter()
            .find(|outcome| outcome.as_str() == s)
            .ok_or_else(|| format!("unknown item outcome: {}", s))
    }
}

/// Why an item did not succeed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// The last attempt hit the per-item timeout
    Timeout,
    /// The last attempt failed to reach the target
    Connection,
    /// The target reported a non-retryable failure
    Permanent,
    /// The target's circuit was open, before the first attempt or before a retry
    CircuitOpen,
    /// Abandoned when the task's total timeout elapsed
    TotalTimeout,
    /// The source gave up because the task was cancelled
    Cancelled,
}

impl ItemErrorKind {
    /// All error kinds
    pub const ALL: [ItemErrorKind; 6] = [
        ItemErrorKind::Timeout,
        ItemErrorKind::Connection,
        ItemErrorKind::Permanent,
        ItemErrorKind::CircuitOpen,
        ItemErrorKind::TotalTimeout,
        ItemErrorKind::Cancelled,
    ];

    /// Stable string form, used in the database
    pub fn as_str(self) -> &'static str {
        match self {
            ItemErrorKind::Timeout => "timeout",
            ItemErrorKind::Connection => "connection",
            ItemErrorKind::Permanent => "permanent",
            ItemErrorKind::CircuitOpen => "circuit_open",
            ItemErrorKind::TotalTimeout => "total_timeout",
            ItemErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ItemErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemErrorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown item error kind: {}", s))
    }
}

impl From<&WorkError> for ItemErrorKind {
    fn from(error: &WorkError) -> Self {
        match error {
            WorkError::Timeout => ItemErrorKind::Timeout,
            WorkError::Connection(_) => ItemErrorKind::Connection,
            WorkError::Permanent(_) => ItemErrorKind::Permanent,
            WorkError::Cancelled => ItemErrorKind::Cancelled,
        }
    }
}

/// One retrievable unit of a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkItem {
    /// URL or endpoint to process
    pub target: String,
    /// Link hops from the seed at which the item was discovered (0 = the seed itself)
    pub depth: u32,
    /// Attempts made so far
    pub attempt_count: u32,
    /// Current outcome
    pub outcome: ItemOutcome,
    /// Classification of the last failure
    pub error_kind: Option<ItemErrorKind>,
    /// Human-readable message of the last failure
    pub error: Option<String>,
    /// Payload returned by the work source on success
    #[schema(value_type = Option<Object>)]
    pub result_payload: Option<serde_json::Value>,
    /// When the latest attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// A fresh, unattempted item
    pub fn new(target: impl Into<String>, depth: u32) -> Self {
        Self {
            target: target.into(),
            depth,
            attempt_count: 0,
            outcome: ItemOutcome::Pending,
            error_kind: None,
            error: None,
            result_payload: None,
            last_attempt_at: None,
        }
    }
}

/// Point-in-time view of a task's progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressSnapshot {
    /// Task id
    pub task_id: TaskId,
    /// Seed target the task was submitted with
    pub seed: String,
    /// Current status
    pub status: TaskStatus,
    /// Items discovered by expansion (0 until expansion completes)
    pub total_items: usize,
    /// Settled items (succeeded, failed or skipped)
    pub completed_items: usize,
    /// Items that succeeded
    pub succeeded_items: usize,
    /// Items that failed
    pub failed_items: usize,
    /// Items skipped because of an open circuit
    pub skipped_items: usize,
    /// `100 * completed_items / total_items`
    pub progress_percent: f64,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Run time from start to terminal status, once terminal
    pub duration_seconds: Option<f64>,
    /// Task-level error (expansion failure, interruption)
    pub error: Option<String>,
}

/// How much of a task's result set is usable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Nothing has settled yet
    NoDataYet,
    /// Every settled item succeeded
    AllSucceeded,
    /// Some settled items succeeded and some did not
    PartiallyFailed,
    /// Every settled item failed or was skipped
    AllFailed,
}

/// A successful item's payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemResult {
    /// Item target
    pub target: String,
    /// Payload returned by the work source
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// A failed or skipped item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemFailure {
    /// Item target
    pub target: String,
    /// `failed` or `skipped`
    pub outcome: ItemOutcome,
    /// Failure classification
    pub error_kind: Option<ItemErrorKind>,
    /// Failure message
    pub error: Option<String>,
    /// Attempts made before giving up
    pub attempts: u32,
}

/// Aggregate figures of a [`ResultBundle`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultSummary {
    /// Items discovered by expansion
    pub total_items: usize,
    /// Items that succeeded
    pub succeeded_items: usize,
    /// Items that failed
    pub failed_items: usize,
    /// Items skipped because of an open circuit
    pub skipped_items: usize,
    /// Percentage of all items that succeeded
    pub success_rate: f64,
    /// Run time, once terminal
    pub duration_seconds: Option<f64>,
    /// Distinguishes "no data yet" from "everything failed" from "partially failed"
    pub coverage: Coverage,
}

/// Results of a task, complete or partial
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultBundle {
    /// Task id
    pub task_id: TaskId,
    /// Status at query time
    pub status: TaskStatus,
    /// Payloads of succeeded items, in item order
    pub results: Vec<ItemResult>,
    /// Failed and skipped items, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ItemFailure>>,
    /// Aggregate figures
    pub summary: ResultSummary,
}

/// Counters of item failures across all tasks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorStats {
    /// Attempts that hit the per-item timeout
    pub timeouts: u64,
    /// Attempts that failed to reach their target
    pub connection_errors: u64,
    /// Attempts rejected permanently
    pub permanent_errors: u64,
    /// Attempts refused by an open circuit
    pub circuit_open_skips: u64,
    /// Attempts the source abandoned on cancellation
    pub cancellations: u64,
}

/// Overall health classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Slots available and few circuits open
    Healthy,
    /// Many targets are being isolated
    Degraded,
    /// No free global slot
    AtCapacity,
}

/// Health report of the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    /// Overall classification
    pub status: HealthStatus,
    /// Tasks holding a global slot
    pub active_tasks: usize,
    /// Tasks in the registry, terminal or not
    pub total_tasks: usize,
    /// Global task cap
    pub max_concurrent_tasks: usize,
    /// Free global slots
    pub free_global_slots: usize,
    /// Targets whose circuit is open or half-open
    pub open_circuits: Vec<String>,
    /// Number of tasks per status
    pub status_distribution: BTreeMap<String, usize>,
    /// Failure counters
    pub error_stats: ErrorStats,
}

/// Event emitted during a task's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted
    TaskSubmitted {
        /// Task id
        id: TaskId,
        /// Seed target
        seed: String,
    },

    /// Task acquired a global slot
    TaskStarted {
        /// Task id
        id: TaskId,
    },

    /// Expansion finished and the item list is fixed
    TaskExpanded {
        /// Task id
        id: TaskId,
        /// Number of items
        total_items: usize,
    },

    /// An item reached its final outcome
    ItemSettled {
        /// Task id
        id: TaskId,
        /// Item target
        target: String,
        /// Final outcome
        outcome: ItemOutcome,
        /// Attempts made
        attempts: u32,
    },

    /// A target's circuit opened
    CircuitOpened {
        /// Circuit key (host of the target)
        target: String,
        /// Consecutive failures that opened it
        failures: u32,
    },

    /// Task reached a terminal status
    TaskFinished {
        /// Task id
        id: TaskId,
        /// Terminal status
        status: TaskStatus,
        /// Items that succeeded
        succeeded_items: usize,
        /// Items that failed
        failed_items: usize,
        /// Items skipped
        skipped_items: usize,
    },

    /// Terminal tasks evicted after the retention window
    TasksReaped {
        /// Number of tasks removed
        count: usize,
    },
}

impl Event {
    /// Snake-case name of the variant, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TaskSubmitted { .. } => "task_submitted",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskExpanded { .. } => "task_expanded",
            Event::ItemSettled { .. } => "item_settled",
            Event::CircuitOpened { .. } => "circuit_opened",
            Event::TaskFinished { .. } => "task_finished",
            Event::TasksReaped { .. } => "tasks_reaped",
        }
    }
}
