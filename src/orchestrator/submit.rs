//! Validation and admission of new tasks.

use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::types::{Event, TaskId};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::TaskOrchestrator;
use super::registry::TaskEntry;

impl TaskOrchestrator {
    /// Submit a task and return its id without waiting for any item to run
    ///
    /// The task is registered as `Pending`, persisted when a store is
    /// configured, and handed to a background worker that expands the seed and
    /// runs the items.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `config` fails [`TaskConfig::validate`] or the
    ///   seed is blank
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has started
    pub async fn submit(&self, config: TaskConfig, seed: impl Into<String>) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        config.validate()?;

        let seed = seed.into().trim().to_string();
        if seed.is_empty() {
            return Err(Error::invalid_config(
                "seed",
                "seed target must not be empty",
            ));
        }

        let entry = Arc::new(TaskEntry::new(TaskId::new(), seed, config));
        let id = entry.id;
        self.registry.insert(entry.clone());
        self.persist_new(&entry).await;

        tracing::info!(
            task_id = %id,
            seed = %entry.seed,
            max_depth = entry.config.max_depth,
            max_concurrent_items = entry.config.max_concurrent_items,
            "Task submitted"
        );
        self.emit_event(Event::TaskSubmitted {
            id,
            seed: entry.seed.clone(),
        });

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let driver = tokio::spawn({
                let orchestrator = orchestrator.clone();
                let entry = entry.clone();
                async move { orchestrator.run_task(entry).await }
            });
            // A panicking driver must still leave the task terminal
            match driver.await {
                Err(e) if e.is_panic() => {
                    tracing::error!(task_id = %entry.id, error = %e, "Task driver panicked");
                    orchestrator.fail_stopped_task(&entry).await;
                }
                _ => {}
            }
        });

        Ok(id)
    }
}
