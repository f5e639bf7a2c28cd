//! Best-effort writes to the durable store and startup recovery.
//!
//! Storage errors are logged and never change a task's in-memory outcome.

use crate::config::TaskConfig;
use crate::db::{NewTask, TaskRow, TaskUpdate, from_millis};
use crate::error::Result;
use crate::progress;
use crate::types::WorkItem;
use std::sync::Arc;

use super::TaskOrchestrator;
use super::registry::{TaskEntry, TaskState};

/// Error recorded on tasks a previous process left unfinished
pub(crate) const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

impl TaskOrchestrator {
    pub(crate) async fn persist_new(&self, entry: &TaskEntry) {
        let Some(db) = &self.db else {
            return;
        };
        let task = NewTask {
            id: entry.id,
            seed: &entry.seed,
            config: &entry.config,
            created_at: entry.created_at,
        };
        if let Err(e) = db.insert_task(&task).await {
            tracing::warn!(task_id = %entry.id, error = %e, "Failed to persist new task");
        }
    }

    pub(crate) async fn persist_progress(&self, entry: &TaskEntry) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db.update_task(&task_update(entry)).await {
            tracing::warn!(task_id = %entry.id, error = %e, "Failed to persist task status");
        }
    }

    /// Status plus the full item set, written once the task is terminal
    pub(crate) async fn persist_final(&self, entry: &TaskEntry) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db.update_task(&task_update(entry)).await {
            tracing::warn!(task_id = %entry.id, error = %e, "Failed to persist task status");
        }
        if let Err(e) = db.replace_items(entry.id, &entry.items()).await {
            tracing::warn!(task_id = %entry.id, error = %e, "Failed to persist task items");
        }
    }

    /// Fail tasks left unfinished by a previous process and reload terminal ones
    pub(crate) async fn restore_from_store(&self) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };

        let interrupted = db.mark_interrupted_tasks(INTERRUPTED_MESSAGE).await?;
        if interrupted > 0 {
            tracing::warn!(interrupted, "Marked unfinished tasks from a previous run as failed");
        }

        let mut restored = 0;
        for row in db.list_tasks().await? {
            let Some(id) = row.task_id() else {
                tracing::warn!(id = %row.id, "Skipping stored task with malformed id");
                continue;
            };
            let items: Vec<WorkItem> = db
                .get_items(id)
                .await?
                .into_iter()
                .map(WorkItem::from)
                .collect();
            if let Some(entry) = restore_entry(row, items) {
                self.registry.insert(Arc::new(entry));
                restored += 1;
            }
        }

        if restored > 0 {
            tracing::info!(restored, "Restored tasks from database");
        }
        Ok(())
    }
}

fn task_update(entry: &TaskEntry) -> TaskUpdate {
    let state = entry.read();
    let tally = progress::tally(&state.items);
    TaskUpdate {
        id: entry.id,
        status: state.status,
        total_items: tally.total,
        succeeded_items: tally.succeeded,
        failed_items: tally.failed,
        skipped_items: tally.skipped,
        error: state.error.clone(),
        updated_at: state.updated_at,
        started_at: state.started_at,
        completed_at: state.completed_at,
    }
}

/// Rebuild a terminal task; anything else is skipped
fn restore_entry(row: TaskRow, items: Vec<WorkItem>) -> Option<TaskEntry> {
    let id = row.task_id()?;
    let status = row.task_status().filter(|status| status.is_terminal())?;
    let config = serde_json::from_str::<TaskConfig>(&row.config).unwrap_or_else(|e| {
        tracing::warn!(task_id = %id, error = %e, "Stored task config unreadable, using defaults");
        TaskConfig::default()
    });
    let completed_at = row.completed_at.unwrap_or(row.updated_at);

    let state = TaskState {
        status,
        items,
        updated_at: from_millis(row.updated_at),
        started_at: row.started_at.map(from_millis),
        completed_at: Some(from_millis(completed_at)),
        error: row.error,
    };
    Some(TaskEntry::restored(
        id,
        row.seed,
        config,
        from_millis(row.created_at),
        state,
    ))
}
