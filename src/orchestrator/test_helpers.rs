//! Shared test helpers: a scripted work source with instrumented counters and
//! orchestrator constructors.

use crate::config::{Config, TaskConfig};
use crate::error::WorkError;
use crate::orchestrator::TaskOrchestrator;
use crate::source::{DiscoveredTarget, WorkContext, WorkSource};
use crate::types::TaskId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the scripted source answers a target
#[derive(Clone, Debug)]
pub(crate) enum Behavior {
    /// Return a payload right away
    Succeed,
    /// Return a payload after a delay
    Delay(Duration),
    /// Fail every call
    FailAlways(WorkError),
    /// Fail the first `n` calls for each target, then succeed
    FailTimes(u32, WorkError),
    /// Never answer (until cancelled or dropped)
    Hang,
}

/// A [`WorkSource`] whose answers are chosen by substring rules
///
/// Counts calls per target, items in flight, and the peak number of items and
/// distinct tasks in flight at once.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    links: Vec<String>,
    discover_error: Option<WorkError>,
    discover_delay: Option<Duration>,
    discover_panics: bool,
    rules: Vec<(String, Behavior)>,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    tasks_in_flight: Mutex<HashMap<TaskId, usize>>,
    max_tasks_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Targets returned by discovery
    pub(crate) fn with_links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    /// `n` targets under `https://{host}/posts/`
    pub(crate) fn with_pages(self, host: &str, n: usize) -> Self {
        self.with_links((0..n).map(|i| format!("https://{}/posts/{}", host, i)))
    }

    pub(crate) fn discover_fails(mut self, error: WorkError) -> Self {
        self.discover_error = Some(error);
        self
    }

    pub(crate) fn discover_delay(mut self, delay: Duration) -> Self {
        self.discover_delay = Some(delay);
        self
    }

    /// Panic inside discovery, taking the task driver down with it
    pub(crate) fn discover_panics(mut self) -> Self {
        self.discover_panics = true;
        self
    }

    /// Answer targets containing `pattern` with `behavior` (first match wins)
    pub(crate) fn rule(mut self, pattern: &str, behavior: Behavior) -> Self {
        self.rules.push((pattern.to_string(), behavior));
        self
    }

    /// Calls made for `target`
    pub(crate) fn calls_for(&self, target: &str) -> u32 {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Distinct targets called at least once
    pub(crate) fn targets_called(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_tasks_in_flight(&self) -> usize {
        self.max_tasks_in_flight.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, target: &str) -> Behavior {
        self.rules
            .iter()
            .find(|(pattern, _)| target.contains(pattern.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or(Behavior::Succeed)
    }

    fn enter(&self, task_id: TaskId) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut tasks = self.tasks_in_flight.lock().unwrap();
        *tasks.entry(task_id).or_default() += 1;
        self.max_tasks_in_flight
            .fetch_max(tasks.len(), Ordering::SeqCst);

        InFlight {
            source: self,
            task_id,
        }
    }
}

/// Decrements the in-flight counters when an attempt ends or is dropped
struct InFlight<'a> {
    source: &'a ScriptedSource,
    task_id: TaskId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.source.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut tasks = self.source.tasks_in_flight.lock().unwrap();
        if let Some(count) = tasks.get_mut(&self.task_id) {
            *count -= 1;
            if *count == 0 {
                tasks.remove(&self.task_id);
            }
        }
    }
}

#[async_trait]
impl WorkSource for ScriptedSource {
    async fn discover(
        &self,
        _seed: &str,
        _max_depth: u32,
        _ctx: &WorkContext,
    ) -> Result<Vec<DiscoveredTarget>, WorkError> {
        if let Some(delay) = self.discover_delay {
            tokio::time::sleep(delay).await;
        }
        if self.discover_panics {
            panic!("discovery blew up");
        }
        match &self.discover_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.links.iter().map(|link| link.as_str().into()).collect()),
        }
    }

    async fn fetch_and_extract(
        &self,
        target: &str,
        ctx: &WorkContext,
    ) -> Result<serde_json::Value, WorkError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(target.to_string()).or_default();
            *count += 1;
            *count
        };
        let _guard = self.enter(ctx.task_id);
        let payload = serde_json::json!({ "url": target, "attempt": ctx.attempt });

        match self.behavior_for(target) {
            Behavior::Succeed => Ok(payload),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
            Behavior::FailAlways(error) => Err(error),
            Behavior::FailTimes(n, error) => {
                if call <= n {
                    Err(error)
                } else {
                    Ok(payload)
                }
            }
            Behavior::Hang => {
                ctx.cancel.cancelled().await;
                Err(WorkError::Cancelled)
            }
        }
    }
}

/// Task config with short timeouts and no jitter-sensitive waits
pub(crate) fn fast_task_config() -> TaskConfig {
    TaskConfig {
        max_concurrent_items: 5,
        item_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_secs(20),
        retry_attempts: 2,
        max_depth: 1,
        partial_results_ok: true,
        expansion_timeout: Duration::from_secs(2),
    }
}

/// In-memory config with millisecond backoff
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.task_defaults = fast_task_config();
    config
}

/// Orchestrator over `source` with in-memory state only
pub(crate) async fn create_test_orchestrator(
    source: ScriptedSource,
) -> (TaskOrchestrator, Arc<ScriptedSource>) {
    create_test_orchestrator_with(test_config(), source).await
}

pub(crate) async fn create_test_orchestrator_with(
    config: Config,
    source: ScriptedSource,
) -> (TaskOrchestrator, Arc<ScriptedSource>) {
    let source = Arc::new(source);
    let orchestrator = TaskOrchestrator::new(config, source.clone()).await.unwrap();
    (orchestrator, source)
}

/// Orchestrator backed by a SQLite file inside a temp dir
///
/// Returns the tempdir too, which must be kept alive.
pub(crate) async fn create_persistent_orchestrator(
    source: ScriptedSource,
) -> (TaskOrchestrator, Arc<ScriptedSource>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.persistence.database_path = Some(temp_dir.path().join("tasks.db"));
    let (orchestrator, source) = create_test_orchestrator_with(config, source).await;
    (orchestrator, source, temp_dir)
}
