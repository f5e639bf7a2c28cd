use super::test_helpers::*;
use super::*;
use crate::config::TaskConfig;
use crate::error::{Error, WorkError};
use crate::types::{
    Coverage, Event, HealthStatus, ItemErrorKind, ItemOutcome, TaskId, TaskStatus,
};
use std::time::Duration;

mod lifecycle;
mod persistence;

/// Generous bound for a task to settle in tests
const SETTLE: Duration = Duration::from_secs(10);

async fn run_to_end(orchestrator: &TaskOrchestrator, config: TaskConfig, seed: &str) -> TaskId {
    let id = orchestrator.submit(config, seed).await.unwrap();
    orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();
    id
}

/// Poll `check` every few milliseconds until it holds or `SETTLE` elapses
async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
