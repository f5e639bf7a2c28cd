//! Task and item CRUD operations.

use crate::error::DatabaseError;
use crate::types::{TaskId, TaskStatus, WorkItem};
use crate::{Error, Result};

use super::{Database, NewTask, TaskItemRow, TaskRow, TaskUpdate, to_millis};

const TASK_COLUMNS: &str = r#"
    id, seed, status, config, total_items, succeeded_items, failed_items,
    skipped_items, error, created_at, updated_at, started_at, completed_at
"#;

impl Database {
    /// Insert a freshly submitted task
    pub async fn insert_task(&self, task: &NewTask<'_>) -> Result<()> {
        let config = serde_json::to_string(task.config)?;
        let created_at = to_millis(task.created_at);

        sqlx::query(
            r#"
            INSERT INTO tasks (id, seed, status, config, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.seed)
        .bind(TaskStatus::Pending.as_str())
        .bind(config)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Write a task's status, counters and timestamps
    pub async fn update_task(&self, update: &TaskUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks SET
                status = ?, total_items = ?, succeeded_items = ?, failed_items = ?,
                skipped_items = ?, error = ?, updated_at = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.total_items as i64)
        .bind(update.succeeded_items as i64)
        .bind(update.failed_items as i64)
        .bind(update.skipped_items as i64)
        .bind(&update.error)
        .bind(to_millis(update.updated_at))
        .bind(update.started_at.map(to_millis))
        .bind(update.completed_at.map(to_millis))
        .bind(update.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Replace every stored item of a task in one transaction
    pub async fn replace_items(&self, id: TaskId, items: &[WorkItem]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let task_id = id.to_string();
        sqlx::query("DELETE FROM task_items WHERE task_id = ?")
            .bind(&task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear task items: {}",
                    e
                )))
            })?;

        for (position, item) in items.iter().enumerate() {
            let payload = item
                .result_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO task_items (
                    task_id, position, target, depth, outcome, attempts,
                    error_kind, error, payload, last_attempt_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task_id)
            .bind(position as i64)
            .bind(&item.target)
            .bind(i64::from(item.depth))
            .bind(item.outcome.as_str())
            .bind(i64::from(item.attempt_count))
            .bind(item.error_kind.map(|kind| kind.as_str()))
            .bind(&item.error)
            .bind(payload)
            .bind(item.last_attempt_at.map(to_millis))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert task item: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit task items: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a task by id
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Items of a task, in position order
    pub async fn get_items(&self, id: TaskId) -> Result<Vec<TaskItemRow>> {
        let rows = sqlx::query_as::<_, TaskItemRow>(
            r#"
            SELECT
                task_id, position, target, depth, outcome, attempts,
                error_kind, error, payload, last_attempt_at
            FROM task_items
            WHERE task_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task items: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// All tasks, newest first
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Fail every task a previous process left pending or running
    ///
    /// Returns the number of tasks marked.
    pub async fn mark_interrupted_tasks(&self, message: &str) -> Result<u64> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = ?, error = ?, updated_at = ?, completed_at = ?
            WHERE status IN (?, ?)
            "#,
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark interrupted tasks: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Delete tasks and, through the foreign key, their items
    pub async fn delete_tasks(&self, ids: &[TaskId]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to delete task: {}",
                        e
                    )))
                })?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}
