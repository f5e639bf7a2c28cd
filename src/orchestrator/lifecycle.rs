//! Retention cleanup and shutdown coordination.

use crate::error::Result;
use crate::types::{Event, TaskId};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TaskOrchestrator;

/// Upper bound on how long shutdown waits for running tasks to settle
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl TaskOrchestrator {
    /// Gracefully shut down the orchestrator
    ///
    /// 1. Stops accepting submissions ([`Error::ShuttingDown`](crate::Error::ShuttingDown))
    /// 2. Cancels every non-terminal task
    /// 3. Waits, at most 30 seconds, for those tasks to reach a terminal status
    /// 4. Closes the global limiter so nothing queued can start afterwards
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let live: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|entry| !entry.status().is_terminal())
            .collect();
        for entry in &live {
            entry.cancel.cancel();
        }
        tracing::info!(live_tasks = live.len(), "Cancelled all live tasks");

        let settle = async {
            for entry in &live {
                let mut rx = entry.subscribe_status();
                let _ = rx.wait_for(|status| status.is_terminal()).await;
            }
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, settle).await {
            Ok(()) => tracing::info!("All live tasks settled"),
            Err(_) => tracing::warn!("Timeout waiting for tasks to settle, proceeding with shutdown"),
        }

        self.limiter.close();
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Evict terminal tasks that finished more than `max_age` ago
    ///
    /// Removes them from the registry and, when configured, from the durable
    /// store. Returns the number of tasks evicted.
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let expired: Vec<TaskId> = self
            .registry
            .all()
            .iter()
            .filter(|entry| {
                entry.completed_at().is_some_and(|completed_at| {
                    (now - completed_at)
                        .to_std()
                        .is_ok_and(|age| age >= max_age)
                })
            })
            .map(|entry| entry.id)
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let count = self.registry.remove(&expired);
        if let Some(db) = &self.db {
            if let Err(e) = db.delete_tasks(&expired).await {
                tracing::warn!(error = %e, "Failed to delete evicted tasks from database");
            }
        }

        tracing::info!(count, "Evicted expired tasks");
        self.emit_event(Event::TasksReaped { count });
        count
    }

    /// Start the background sweep that evicts expired tasks
    ///
    /// Runs [`cleanup_completed`](Self::cleanup_completed) with
    /// `orchestrator.retention` every `orchestrator.cleanup_interval` and stops
    /// once shutdown has begun.
    pub fn start_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let retention = self.config.orchestrator.retention;
        let period = self.config.orchestrator.cleanup_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                if !orchestrator.accepting_new.load(Ordering::SeqCst) {
                    tracing::debug!("Cleanup task stopping");
                    break;
                }
                orchestrator.cleanup_completed(retention).await;
            }
        });

        tracing::info!(
            retention_secs = retention.as_secs(),
            interval_secs = period.as_secs(),
            "Cleanup background task started"
        );

        handle
    }
}
