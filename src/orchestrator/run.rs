//! Expansion, item scheduling and the final status decision.
//!
//! `run_task` is the only writer of a task's status. Cancel requests only
//! trip the task's token; this loop notices at its next checkpoint and
//! decides the terminal status itself.

use crate::error::WorkError;
use crate::executor::ItemRequest;
use crate::limiter::ItemSlots;
use crate::progress::Tally;
use crate::retry::RetryPolicy;
use crate::source::{WorkContext, expand_items};
use crate::types::{Event, ItemErrorKind, TaskStatus, WorkItem};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::TaskOrchestrator;
use super::registry::TaskEntry;

enum Expansion {
    Items(Vec<WorkItem>),
    Cancelled,
    Failed(String),
}

enum Next {
    Slot(OwnedSemaphorePermit),
    Cancelled,
    TimedOut,
}

/// How the item phase ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ItemPhase {
    pub(crate) cancelled: bool,
    pub(crate) timed_out: bool,
}

/// Shared by every item worker of one task
#[derive(Clone)]
struct TaskRun {
    entry: Arc<TaskEntry>,
    slots: ItemSlots,
    policy: Arc<RetryPolicy>,
    /// Child of the task's token, also tripped when the total timeout elapses
    cancel: CancellationToken,
}

impl TaskOrchestrator {
    /// Drive a task from `Pending` to a terminal status
    pub(crate) async fn run_task(&self, entry: Arc<TaskEntry>) {
        let permit = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => None,
            permit = self.limiter.acquire_task() => permit.ok(),
        };
        // Cancelled while queued, or the limiter was closed by shutdown
        let Some(_permit) = permit else {
            self.finish(&entry, TaskStatus::Cancelled).await;
            return;
        };

        let deadline = Instant::now() + entry.config.total_timeout;
        tracing::info!(task_id = %entry.id, "Task started");
        self.emit_event(Event::TaskStarted { id: entry.id });

        let items = match self.expand(&entry, deadline).await {
            Expansion::Items(items) => items,
            Expansion::Cancelled => {
                self.finish(&entry, TaskStatus::Cancelled).await;
                return;
            }
            Expansion::Failed(message) => {
                tracing::error!(task_id = %entry.id, seed = %entry.seed, error = %message, "Task expansion failed");
                entry.set_error(message);
                self.finish(&entry, TaskStatus::Failed).await;
                return;
            }
        };

        let total_items = items.len();
        entry.set_items(items);
        entry.transition(TaskStatus::Running);
        self.persist_progress(&entry).await;
        tracing::info!(task_id = %entry.id, total_items, "Task expanded");
        self.emit_event(Event::TaskExpanded {
            id: entry.id,
            total_items,
        });

        let phase = self.execute_items(&entry, deadline).await;
        let status = final_status(entry.tally(), phase, entry.config.partial_results_ok);
        self.finish(&entry, status).await;
    }

    /// Discover the item list under the expansion timeout
    async fn expand(&self, entry: &TaskEntry, deadline: Instant) -> Expansion {
        let ctx = WorkContext {
            task_id: entry.id,
            attempt: 0,
            cancel: entry.cancel.child_token(),
        };
        let started = Instant::now();
        let limit = (started + entry.config.expansion_timeout).min(deadline);

        let result = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => None,
            result = tokio::time::timeout_at(
                limit,
                expand_items(self.source.as_ref(), &entry.seed, entry.config.max_depth, &ctx),
            ) => Some(result),
        };

        match result {
            None => Expansion::Cancelled,
            Some(Ok(Ok(items))) => Expansion::Items(items),
            Some(Ok(Err(WorkError::Cancelled))) if entry.cancel.is_cancelled() => {
                Expansion::Cancelled
            }
            Some(Ok(Err(e))) => Expansion::Failed(format!("expansion failed: {}", e)),
            Some(Err(_)) => Expansion::Failed(format!(
                "expansion timed out after {}ms",
                (limit - started).as_millis()
            )),
        }
    }

    /// Fan items out under the per-task cap until all settle, the task is
    /// cancelled or the total timeout elapses
    ///
    /// In-flight items are left to finish after a cancel. On total timeout,
    /// remaining retries are abandoned, in-flight attempts are dropped and
    /// items that had started are failed with `TotalTimeout`.
    async fn execute_items(&self, entry: &Arc<TaskEntry>, deadline: Instant) -> ItemPhase {
        let run = TaskRun {
            entry: entry.clone(),
            slots: self
                .limiter
                .item_slots(entry.config.max_concurrent_items),
            policy: Arc::new(RetryPolicy::new(
                self.config.retry.clone(),
                entry.config.max_attempts(),
            )),
            cancel: entry.cancel.child_token(),
        };

        let mut workers = JoinSet::new();
        let mut timed_out = false;

        for index in 0..entry.item_count() {
            let next = tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => Next::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Next::TimedOut,
                slot = run.slots.acquire() => match slot {
                    Ok(slot) => Next::Slot(slot),
                    Err(_) => Next::Cancelled,
                },
            };
            let slot = match next {
                Next::Slot(slot) => slot,
                Next::Cancelled => {
                    tracing::info!(task_id = %entry.id, scheduled = index, "Task cancelled, no further items scheduled");
                    break;
                }
                Next::TimedOut => {
                    timed_out = true;
                    break;
                }
            };
            let Some(target) = entry.target(index) else {
                break;
            };

            tracing::debug!(task_id = %entry.id, url = %target, index, "Scheduling item");
            workers.spawn(self.clone().run_item(run.clone(), index, target, slot));
        }

        if !timed_out {
            match tokio::time::timeout_at(deadline, drain(&mut workers)).await {
                Ok(panicked) if panicked > 0 => {
                    entry.abandon_started_items(
                        ItemErrorKind::Permanent,
                        "item worker stopped unexpectedly",
                    );
                }
                Ok(_) => {}
                Err(_) => timed_out = true,
            }
        }

        if timed_out {
            run.cancel.cancel();
            workers.abort_all();
            drain(&mut workers).await;
            let abandoned =
                entry.abandon_started_items(ItemErrorKind::TotalTimeout, "total timeout elapsed");
            tracing::warn!(
                task_id = %entry.id,
                abandoned,
                total_timeout_secs = entry.config.total_timeout.as_secs(),
                "Total timeout elapsed, abandoning unfinished items"
            );
        }

        ItemPhase {
            cancelled: entry.cancel.is_cancelled(),
            timed_out,
        }
    }

    /// Run one item and record its outcome
    async fn run_item(
        self,
        run: TaskRun,
        index: usize,
        target: String,
        slot: OwnedSemaphorePermit,
    ) {
        let entry = &run.entry;
        let on_attempt = |attempt: u32| entry.record_attempt(index, attempt);

        let report = self
            .executor
            .run(
                ItemRequest {
                    task_id: entry.id,
                    target: &target,
                    policy: &run.policy,
                    item_timeout: entry.config.item_timeout,
                    slots: &run.slots,
                    first_slot: Some(slot),
                    cancel: &run.cancel,
                    on_attempt: &on_attempt,
                },
                self.source.as_ref(),
            )
            .await;

        let outcome = report.outcome;
        let attempts = report.attempts;
        entry.settle_item(index, report);
        self.emit_event(Event::ItemSettled {
            id: entry.id,
            target,
            outcome,
            attempts,
        });
    }

    /// Fail a task whose driver stopped without deciding a status
    pub(crate) async fn fail_stopped_task(&self, entry: &TaskEntry) {
        const STOPPED: &str = "task driver stopped unexpectedly";
        entry.abandon_started_items(ItemErrorKind::Permanent, STOPPED);
        entry.set_error(STOPPED);
        self.finish(entry, TaskStatus::Failed).await;
    }

    /// Apply a terminal status, persist it, then tell watchers and subscribers
    async fn finish(&self, entry: &TaskEntry, status: TaskStatus) {
        if !entry.transition(status) {
            return;
        }
        self.persist_final(entry).await;
        entry.publish_status();

        let tally = entry.tally();
        tracing::info!(
            task_id = %entry.id,
            status = %status,
            total_items = tally.total,
            succeeded_items = tally.succeeded,
            failed_items = tally.failed,
            skipped_items = tally.skipped,
            "Task finished"
        );
        self.emit_event(Event::TaskFinished {
            id: entry.id,
            status,
            succeeded_items: tally.succeeded,
            failed_items: tally.failed,
            skipped_items: tally.skipped,
        });
    }
}

/// Wait for every worker; returns how many panicked
async fn drain(workers: &mut JoinSet<()>) -> usize {
    let mut panicked = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Err(e) if e.is_panic() => {
                tracing::error!(error = %e, "Item worker panicked");
                panicked += 1;
            }
            _ => {}
        }
    }
    panicked
}

/// Terminal status once the item phase is over
pub(crate) fn final_status(tally: Tally, phase: ItemPhase, partial_results_ok: bool) -> TaskStatus {
    if phase.cancelled {
        TaskStatus::Cancelled
    } else if phase.timed_out {
        if tally.succeeded > 0 {
            TaskStatus::PartiallyCompleted
        } else {
            TaskStatus::Failed
        }
    } else if tally.unsuccessful() == 0 {
        TaskStatus::Completed
    } else if tally.succeeded == 0 || !partial_results_ok {
        TaskStatus::Failed
    } else {
        TaskStatus::PartiallyCompleted
    }
}
