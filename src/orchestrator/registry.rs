//! Process-wide task registry and per-task state.
//!
//! The registry map is only locked long enough to clone an `Arc<TaskEntry>`;
//! each task's mutable state sits behind its own lock. Queries copy what they
//! need out of that lock, so they never wait on the scheduling loop.

use crate::config::TaskConfig;
use crate::executor::ItemReport;
use crate::progress::{self, Tally};
use crate::types::{
    ItemErrorKind, ItemFailure, ItemOutcome, ItemResult, ProgressSnapshot, ResultBundle,
    ResultSummary, TaskId, TaskStatus, WorkItem,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Mutable part of a task
#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) status: TaskStatus,
    pub(crate) items: Vec<WorkItem>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error: Option<String>,
}

/// One task: immutable submission data plus its locked state
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) id: TaskId,
    pub(crate) seed: String,
    pub(crate) config: TaskConfig,
    pub(crate) created_at: DateTime<Utc>,
    /// Cancellation requested by a caller or by shutdown
    pub(crate) cancel: CancellationToken,
    state: RwLock<TaskState>,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskEntry {
    pub(crate) fn new(id: TaskId, seed: String, config: TaskConfig) -> Self {
        let now = Utc::now();
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        Self {
            id,
            seed,
            config,
            created_at: now,
            cancel: CancellationToken::new(),
            state: RwLock::new(TaskState {
                status: TaskStatus::Pending,
                items: Vec::new(),
                updated_at: now,
                started_at: None,
                completed_at: None,
                error: None,
            }),
            status_tx,
        }
    }

    /// Rebuild an entry from persisted state (used for terminal tasks only)
    pub(crate) fn restored(
        id: TaskId,
        seed: String,
        config: TaskConfig,
        created_at: DateTime<Utc>,
        state: TaskState,
    ) -> Self {
        let (status_tx, _) = watch::channel(state.status);
        Self {
            id,
            seed,
            config,
            created_at,
            cancel: CancellationToken::new(),
            state: RwLock::new(state),
            status_tx,
        }
    }

    // Writers never leave the state half-updated across a panic point, so a
    // poisoned lock still holds consistent data.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TaskState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.read().status
    }

    pub(crate) fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.read().completed_at
    }

    pub(crate) fn tally(&self) -> Tally {
        progress::tally(&self.read().items)
    }

    pub(crate) fn item_count(&self) -> usize {
        self.read().items.len()
    }

    pub(crate) fn target(&self, index: usize) -> Option<String> {
        self.read().items.get(index).map(|item| item.target.clone())
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    /// Fix the item list; only honored while the task is still pending
    pub(crate) fn set_items(&self, items: Vec<WorkItem>) {
        let mut state = self.write();
        if state.status == TaskStatus::Pending && state.items.is_empty() {
            state.items = items;
            state.updated_at = Utc::now();
        }
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.error = Some(message.into());
            state.updated_at = Utc::now();
        }
    }

    /// Move to `next` if the lifecycle allows it
    ///
    /// Stamps `started_at` on entering `Running` and `completed_at` on reaching a
    /// terminal status. Non-terminal statuses are published to watchers right
    /// away; a terminal one is published by [`publish_status`](Self::publish_status)
    /// once it has been persisted.
    pub(crate) fn transition(&self, next: TaskStatus) -> bool {
        {
            let mut state = self.write();
            if !state.status.can_transition_to(next) {
                return false;
            }
            let now = Utc::now();
            state.status = next;
            state.updated_at = now;
            if next == TaskStatus::Running {
                state.started_at = Some(now);
            }
            if next.is_terminal() {
                state.completed_at = Some(now);
            }
        }
        if !next.is_terminal() {
            self.status_tx.send_replace(next);
        }
        true
    }

    /// Publish the current status to watchers
    pub(crate) fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }

    pub(crate) fn record_attempt(&self, index: usize, attempt: u32) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        if let Some(item) = state.items.get_mut(index) {
            item.attempt_count = attempt;
            item.last_attempt_at = Some(now);
        }
        state.updated_at = now;
    }

    /// Store an item's final outcome; ignored once the task is terminal or the item settled
    pub(crate) fn settle_item(&self, index: usize, report: ItemReport) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        let Some(item) = state.items.get_mut(index) else {
            return;
        };
        if item.outcome.is_settled() {
            return;
        }
        item.outcome = report.outcome;
        item.attempt_count = report.attempts;
        item.error_kind = report.error_kind;
        item.error = report.error;
        item.result_payload = report.payload;
        state.updated_at = Utc::now();
    }

    /// Fail every unsettled item that has made at least one attempt
    ///
    /// Items never started stay `Pending`. Returns how many items were failed.
    pub(crate) fn abandon_started_items(&self, kind: ItemErrorKind, message: &str) -> usize {
        let mut state = self.write();
        if state.status.is_terminal() {
            return 0;
        }
        let mut abandoned = 0;
        for item in state
            .items
            .iter_mut()
            .filter(|item| !item.outcome.is_settled() && item.attempt_count > 0)
        {
            item.outcome = ItemOutcome::Failed;
            item.error_kind = Some(kind);
            item.error = Some(message.to_string());
            abandoned += 1;
        }
        if abandoned > 0 {
            state.updated_at = Utc::now();
        }
        abandoned
    }

    /// Consistent progress view, built under a single read lock
    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let state = self.read();
        let tally = progress::tally(&state.items);
        let terminal = state.status.is_terminal();
        ProgressSnapshot {
            task_id: self.id,
            seed: self.seed.clone(),
            status: state.status,
            total_items: tally.total,
            completed_items: tally.completed(),
            succeeded_items: tally.succeeded,
            failed_items: tally.failed,
            skipped_items: tally.skipped,
            progress_percent: tally.percent(terminal),
            created_at: self.created_at,
            updated_at: state.updated_at,
            completed_at: state.completed_at,
            duration_seconds: duration_seconds(&state),
            error: state.error.clone(),
        }
    }

    /// Results gathered so far, built under a single read lock
    pub(crate) fn result_bundle(&self, include_errors: bool) -> ResultBundle {
        let state = self.read();
        let tally = progress::tally(&state.items);
        let terminal = state.status.is_terminal();

        let results = state
            .items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Success)
            .map(|item| ItemResult {
                target: item.target.clone(),
                payload: item
                    .result_payload
                    .clone()
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let errors = include_errors.then(|| {
            state
                .items
                .iter()
                .filter(|item| {
                    matches!(item.outcome, ItemOutcome::Failed | ItemOutcome::Skipped)
                })
                .map(|item| ItemFailure {
                    target: item.target.clone(),
                    outcome: item.outcome,
                    error_kind: item.error_kind,
                    error: item.error.clone(),
                    attempts: item.attempt_count,
                })
                .collect()
        });

        ResultBundle {
            task_id: self.id,
            status: state.status,
            results,
            errors,
            summary: ResultSummary {
                total_items: tally.total,
                succeeded_items: tally.succeeded,
                failed_items: tally.failed,
                skipped_items: tally.skipped,
                success_rate: tally.success_rate(),
                duration_seconds: duration_seconds(&state),
                coverage: tally.coverage(terminal),
            },
        }
    }

    /// Copy of the item list
    pub(crate) fn items(&self) -> Vec<WorkItem> {
        self.read().items.clone()
    }
}

fn duration_seconds(state: &TaskState) -> Option<f64> {
    match (state.started_at, state.completed_at) {
        (Some(started), Some(completed)) => {
            Some((completed - started).num_milliseconds().max(0) as f64 / 1000.0)
        }
        _ => None,
    }
}

/// Map of task id to entry
#[derive(Clone, Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, Arc<TaskEntry>>>>,
}

impl TaskRegistry {
    pub(crate) fn insert(&self, entry: Arc<TaskEntry>) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id, entry);
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub(crate) fn remove(&self, ids: &[TaskId]) -> usize {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        ids.iter().filter(|id| tasks.remove(id).is_some()).count()
    }

    /// Every entry, in no particular order
    pub(crate) fn all(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
