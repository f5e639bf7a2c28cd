//! Task orchestrator split into focused submodules.
//!
//! The `TaskOrchestrator` struct and its methods are organized by domain:
//! - [`registry`] - Per-task state and the process-wide task map
//! - [`submit`] - Validation and admission of new tasks
//! - [`run`] - Expansion, item scheduling and the final status decision
//! - [`queries`] - Status, results, cancellation, listing and health
//! - [`persist`] - Best-effort writes to the durable store and startup recovery
//! - [`lifecycle`] - Retention cleanup and shutdown coordination

mod lifecycle;
mod persist;
mod queries;
pub(crate) mod registry;
mod run;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::executor::WorkExecutor;
use crate::limiter::ConcurrencyLimiter;
use crate::source::{HttpWorkSource, WorkSource};
use crate::types::Event;
use registry::TaskRegistry;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;

/// Background task orchestrator (cloneable - all fields are Arc-wrapped)
///
/// Accepts batch jobs, expands each into work items, runs the items under the
/// global and per-task concurrency caps and answers status, result and cancel
/// queries while tasks run.
#[derive(Clone)]
pub struct TaskOrchestrator {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Collaborator that discovers and processes items
    pub(crate) source: Arc<dyn WorkSource>,
    /// Every known task, terminal or not
    pub(crate) registry: TaskRegistry,
    /// Global task cap and per-task item caps
    pub(crate) limiter: ConcurrencyLimiter,
    /// Item runner, shared so its error counters span all tasks
    pub(crate) executor: Arc<WorkExecutor>,
    /// Optional durable store
    pub(crate) db: Option<Arc<Database>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with its own circuit breaker
    ///
    /// Opens the database when `persistence.database_path` is set, marks tasks a
    /// previous process left unfinished as failed and reloads terminal tasks so
    /// they stay queryable.
    pub async fn new(config: Config, source: Arc<dyn WorkSource>) -> Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        Self::with_circuit_breaker(config, source, breaker).await
    }

    /// Create an orchestrator over the built-in [`HttpWorkSource`]
    pub async fn with_http_source(config: Config) -> Result<Self> {
        let source = Arc::new(HttpWorkSource::new(config.http_source.clone())?);
        Self::new(config, source).await
    }

    /// Create an orchestrator sharing an existing circuit breaker
    ///
    /// Lets several orchestrators, or a test, observe the same per-target
    /// failure state.
    pub async fn with_circuit_breaker(
        config: Config,
        source: Arc<dyn WorkSource>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self> {
        let (event_tx, _rx) = broadcast::channel(config.orchestrator.event_buffer.max(1));

        let db = match &config.persistence.database_path {
            Some(path) => Some(Arc::new(Database::new(path).await?)),
            None => None,
        };

        let limiter = ConcurrencyLimiter::new(config.orchestrator.max_concurrent_tasks);
        let executor = Arc::new(WorkExecutor::new(breaker, event_tx.clone()));

        let orchestrator = Self {
            config: Arc::new(config),
            source,
            registry: TaskRegistry::default(),
            limiter,
            executor,
            db,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        orchestrator.restore_from_store().await?;

        tracing::info!(
            max_concurrent_tasks = orchestrator.limiter.max_tasks(),
            persistent = orchestrator.db.is_some(),
            "Task orchestrator initialized"
        );

        Ok(orchestrator)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported; each receives every event. A
    /// subscriber that falls more than `orchestrator.event_buffer` events behind
    /// gets `RecvError::Lagged`. Polling [`get_status`](Self::get_status) stays the
    /// primary way to follow a task.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crawl_orchestrator::{Config, TaskOrchestrator};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let orchestrator = TaskOrchestrator::with_http_source(Config::default()).await?;
    ///
    ///     let mut events = orchestrator.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "task event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The circuit breaker shared by every task of this orchestrator
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    /// Emit an event to all subscribers
    ///
    /// Events are dropped silently when nobody is subscribed.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let orchestrator = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(orchestrator, config).await })
    }
}
