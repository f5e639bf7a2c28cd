//! # crawl-orchestrator
//!
//! Background task orchestrator for batched crawl and extraction jobs.
//!
//! A caller submits a seed target (for example a site's front page) and gets a
//! [`TaskId`] back at once. In the background the seed is expanded into work
//! items, the items run under a global task cap and a per-task item cap, and
//! each item is retried with exponential backoff. A per-target circuit breaker
//! stops a failing host from eating retries meant for healthy ones.
//!
//! Progress is polled: [`TaskOrchestrator::get_status`] never waits on a
//! running task, and [`TaskOrchestrator::get_results`] answers once the task is
//! terminal (or earlier, if the caller accepts partial results).
//!
//! ## Quick Start
//!
//! ```no_run
//! use crawl_orchestrator::{Config, TaskConfig, TaskOrchestrator};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = TaskOrchestrator::with_http_source(Config::default()).await?;
//!
//!     let config = TaskConfig {
//!         max_concurrent_items: 5,
//!         ..Default::default()
//!     };
//!     let id = orchestrator.submit(config, "https://blog.example.com/").await?;
//!
//!     let snapshot = orchestrator
//!         .wait_for_terminal(id, Duration::from_secs(600))
//!         .await?;
//!     println!("{} finished as {}", id, snapshot.status);
//!
//!     let results = orchestrator.get_results(id, true, false)?;
//!     println!("{} pages extracted", results.results.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Per-target circuit breaker
pub mod circuit_breaker;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Single-item execution with retry and circuit checks
pub mod executor;
/// Global and per-task concurrency limits
pub mod limiter;
/// Task orchestrator (decomposed into focused submodules)
pub mod orchestrator;
/// Progress arithmetic over item outcomes
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Work sources (the item discovery and processing collaborator)
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{Config, TaskConfig};
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus, WorkError};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::TaskOrchestrator;
pub use retry::{RetryDecision, RetryPolicy};
pub use source::{DiscoveredTarget, HttpWorkSource, WorkContext, WorkSource};
pub use types::{
    Coverage, Event, HealthReport, HealthStatus, ItemErrorKind, ItemOutcome, ProgressSnapshot,
    ResultBundle, TaskId, TaskStatus, WorkItem,
};

/// Run the orchestrator until a termination signal, then shut it down
///
/// Listens for SIGTERM and Ctrl+C on Unix, Ctrl+C elsewhere. Shutdown cancels
/// running tasks and persists their final state.
///
/// # Example
///
/// ```no_run
/// use crawl_orchestrator::{Config, TaskOrchestrator, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Arc::new(TaskOrchestrator::with_http_source(Config::default()).await?);
///     orchestrator.start_cleanup_task();
///     orchestrator.spawn_api_server();
///
///     run_with_shutdown(&orchestrator).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: &TaskOrchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

/// Resolves on the first SIGTERM or interrupt
///
/// A handler that cannot be registered is logged and never fires, so the other
/// one still works inside restricted containers.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = terminate => tracing::info!("Shutdown requested by SIGTERM"),
        _ = interrupt() => tracing::info!("Shutdown requested by interrupt"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    interrupt().await;
    tracing::info!("Shutdown requested by interrupt");
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Interrupt handler unavailable");
        std::future::pending::<()>().await;
    }
}
