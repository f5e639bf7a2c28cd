//! Progress aggregation
//!
//! Pure functions over a task's item slice. Callers pass a slice read under the
//! task's lock, so every figure in a snapshot comes from the same state.

use crate::types::{Coverage, ItemOutcome, WorkItem};

/// Outcome counts of a task's items
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    /// Items in the task
    pub total: usize,
    /// Items that succeeded
    pub succeeded: usize,
    /// Items that failed
    pub failed: usize,
    /// Items skipped because of an open circuit
    pub skipped: usize,
}

impl Tally {
    /// Settled items (succeeded, failed or skipped)
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Items not settled yet
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.completed())
    }

    /// Settled items that did not succeed
    pub fn unsuccessful(&self) -> usize {
        self.failed + self.skipped
    }

    /// `100 * completed / total`
    ///
    /// An empty task reports 0 while it is still running and 100 once it is
    /// terminal, so a finished empty task reads as complete.
    pub fn percent(&self, terminal: bool) -> f64 {
        if self.total == 0 {
            return if terminal { 100.0 } else { 0.0 };
        }
        100.0 * self.completed() as f64 / self.total as f64
    }

    /// Percentage of all items that succeeded (0 for an empty task)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.succeeded as f64 / self.total as f64
    }

    /// How much of the result set is usable
    pub fn coverage(&self, terminal: bool) -> Coverage {
        if self.total == 0 {
            return if terminal {
                Coverage::AllSucceeded
            } else {
                Coverage::NoDataYet
            };
        }
        match (self.succeeded, self.unsuccessful()) {
            (0, 0) => Coverage::NoDataYet,
            (_, 0) => Coverage::AllSucceeded,
            (0, _) => Coverage::AllFailed,
            _ => Coverage::PartiallyFailed,
        }
    }
}

/// Count item outcomes
pub fn tally(items: &[WorkItem]) -> Tally {
    items.iter().fold(
        Tally {
            total: items.len(),
            ..Tally::default()
        },
        |mut tally, item| {
            match item.outcome {
                ItemOutcome::Success => tally.succeeded += 1,
                ItemOutcome::Failed => tally.failed += 1,
                ItemOutcome::Skipped => tally.skipped += 1,
                ItemOutcome::Pending => {}
            }
            tally
        },
    )
}
