//! Status, results, cancellation, listing and health queries.
//!
//! None of these wait on a running task: each clones the task's entry out of
//! the registry and copies what it needs under the task's own read lock.

use crate::error::{Error, Result};
use crate::types::{
    HealthReport, HealthStatus, ProgressSnapshot, ResultBundle, TaskId, TaskStatus, WorkItem,
};
use std::collections::BTreeMap;
use std::time::Duration;

use super::TaskOrchestrator;

/// Default page size of [`TaskOrchestrator::list_tasks`]
pub const DEFAULT_LIST_LIMIT: usize = 100;

impl TaskOrchestrator {
    /// Current progress of a task
    ///
    /// Repeated calls without intervening progress return identical snapshots.
    pub fn get_status(&self, id: TaskId) -> Result<ProgressSnapshot> {
        self.registry
            .get(id)
            .map(|entry| entry.snapshot())
            .ok_or(Error::TaskNotFound(id))
    }

    /// Results of a task
    ///
    /// A terminal task always answers with its full bundle. A running task
    /// answers with what has settled so far only when the caller passes
    /// `accept_partial` and the task was submitted with `partial_results_ok`;
    /// otherwise the result is [`Error::NotReady`].
    pub fn get_results(
        &self,
        id: TaskId,
        include_errors: bool,
        accept_partial: bool,
    ) -> Result<ResultBundle> {
        let entry = self.registry.get(id).ok_or(Error::TaskNotFound(id))?;
        let bundle = entry.result_bundle(include_errors);
        if !bundle.status.is_terminal() && !(accept_partial && entry.config.partial_results_ok) {
            return Err(Error::NotReady {
                id,
                status: bundle.status,
            });
        }
        Ok(bundle)
    }

    /// Request cooperative cancellation
    ///
    /// Returns `true` if the task exists and was not yet terminal. Items not
    /// yet started never start; items in flight finish or hit their per-item
    /// timeout, then the task ends as `Cancelled`.
    pub fn cancel(&self, id: TaskId) -> bool {
        let Some(entry) = self.registry.get(id) else {
            return false;
        };
        if entry.status().is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        tracing::info!(task_id = %id, "Task cancellation requested");
        true
    }

    /// Snapshots of known tasks, newest first
    ///
    /// `limit` defaults to [`DEFAULT_LIST_LIMIT`].
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: Option<usize>,
    ) -> Vec<ProgressSnapshot> {
        let mut snapshots: Vec<ProgressSnapshot> = self
            .registry
            .all()
            .iter()
            .map(|entry| entry.snapshot())
            .filter(|snapshot| status.is_none_or(|status| snapshot.status == status))
            .collect();
        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.task_id.cmp(&a.task_id))
        });
        snapshots.truncate(limit.unwrap_or(DEFAULT_LIST_LIMIT));
        snapshots
    }

    /// Items of a task with their current outcomes
    pub fn task_items(&self, id: TaskId) -> Result<Vec<WorkItem>> {
        self.registry
            .get(id)
            .map(|entry| entry.items())
            .ok_or(Error::TaskNotFound(id))
    }

    /// Slot usage, open circuits and failure counters
    ///
    /// `degraded` wins over `at_capacity` when both apply.
    pub fn health(&self) -> HealthReport {
        let mut status_distribution: BTreeMap<String, usize> = TaskStatus::ALL
            .into_iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        let entries = self.registry.all();
        for entry in &entries {
            *status_distribution
                .entry(entry.status().as_str().to_string())
                .or_default() += 1;
        }

        let open_circuits = self.executor.breaker().open_circuits();
        let free_global_slots = self.limiter.free_global_slots();
        let status = if open_circuits.len() > self.config.orchestrator.degraded_open_circuits {
            HealthStatus::Degraded
        } else if free_global_slots == 0 {
            HealthStatus::AtCapacity
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            active_tasks: self.limiter.active_tasks(),
            total_tasks: entries.len(),
            max_concurrent_tasks: self.limiter.max_tasks(),
            free_global_slots,
            open_circuits,
            status_distribution,
            error_stats: self.executor.error_stats(),
        }
    }

    /// Wait until a task is terminal and return its final snapshot
    ///
    /// Fails with [`Error::NotReady`] if `timeout` elapses first.
    pub async fn wait_for_terminal(
        &self,
        id: TaskId,
        timeout: Duration,
    ) -> Result<ProgressSnapshot> {
        let entry = self.registry.get(id).ok_or(Error::TaskNotFound(id))?;
        let mut rx = entry.subscribe_status();

        let reached = tokio::time::timeout(timeout, rx.wait_for(|status| status.is_terminal()))
            .await
            .is_ok();
        if !reached {
            return Err(Error::NotReady {
                id,
                status: entry.status(),
            });
        }
        Ok(entry.snapshot())
    }
}
