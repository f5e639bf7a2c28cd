//! Concurrency limits
//!
//! Two independent bounds, both backed by `tokio::sync::Semaphore`:
//! a process-wide cap on running tasks, and a per-task cap on running items.
//! Slots are owned permits, so they are released on every exit path when the
//! permit is dropped (completion, failure, cancellation, panic, abort).

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Global task cap plus a factory for per-task item caps
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    tasks: Arc<Semaphore>,
    max_tasks: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `max_tasks` running tasks
    ///
    /// The cap is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(max_tasks: usize) -> Self {
        let max_tasks = clamp_permits(max_tasks);
        Self {
            tasks: Arc::new(Semaphore::new(max_tasks)),
            max_tasks,
        }
    }

    /// Wait for a global task slot
    ///
    /// Fails with [`Error::ShuttingDown`] once the limiter has been closed.
    pub async fn acquire_task(&self) -> Result<OwnedSemaphorePermit> {
        self.tasks
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    /// Free global slots right now
    pub fn free_global_slots(&self) -> usize {
        self.tasks.available_permits()
    }

    /// Tasks currently holding a global slot
    pub fn active_tasks(&self) -> usize {
        self.max_tasks.saturating_sub(self.tasks.available_permits())
    }

    /// Global task cap
    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Reject every pending and future task acquisition
    pub fn close(&self) {
        self.tasks.close();
    }

    /// A fresh per-task item cap
    pub fn item_slots(&self, max_items: usize) -> ItemSlots {
        ItemSlots::new(max_items)
    }
}

/// Per-task cap on simultaneously running items
#[derive(Clone, Debug)]
pub struct ItemSlots {
    slots: Arc<Semaphore>,
    max_items: usize,
}

impl ItemSlots {
    fn new(max_items: usize) -> Self {
        let max_items = clamp_permits(max_items);
        Self {
            slots: Arc::new(Semaphore::new(max_items)),
            max_items,
        }
    }

    /// Wait for an item slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("item slots closed".to_string()))
    }

    /// Items of this task currently holding a slot
    pub fn in_use(&self) -> usize {
        self.max_items.saturating_sub(self.slots.available_permits())
    }

    /// Free item slots right now
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

fn clamp_permits(permits: usize) -> usize {
    permits.clamp(1, Semaphore::MAX_PERMITS)
}
