//! Simulated crawl example
//!
//! Runs a crawl task against an in-memory work source instead of the network:
//! - One healthy blog and one host that is down
//! - An occasional transient failure that the retry policy absorbs
//! - Event subscription, status polling and partial result retrieval

use async_trait::async_trait;
use crawl_orchestrator::{
    Config, DiscoveredTarget, Event, TaskConfig, TaskOrchestrator, WorkContext, WorkError,
    WorkSource,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

struct SimulatedWeb {
    calls: AtomicU32,
}

#[async_trait]
impl WorkSource for SimulatedWeb {
    async fn discover(
        &self,
        _seed: &str,
        _max_depth: u32,
        _ctx: &WorkContext,
    ) -> Result<Vec<DiscoveredTarget>, WorkError> {
        let mut links: Vec<DiscoveredTarget> = (1..=12)
            .map(|i| DiscoveredTarget::from(format!("https://blog.example/posts/{}", i)))
            .collect();
        links.extend(
            (1..=4).map(|i| DiscoveredTarget::from(format!("https://down.example/posts/{}", i))),
        );
        Ok(links)
    }

    async fn fetch_and_extract(
        &self,
        target: &str,
        ctx: &WorkContext,
    ) -> Result<serde_json::Value, WorkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        if target.contains("down.example") {
            return Err(WorkError::Connection("connection refused".into()));
        }
        if call % 5 == 0 && ctx.attempt == 1 {
            return Err(WorkError::Timeout);
        }
        Ok(serde_json::json!({
            "url": target,
            "title": format!("Post {}", target.rsplit('/').next().unwrap_or_default()),
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crawl_orchestrator=info".into()),
        )
        .init();

    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(100);
    config.circuit_breaker.failure_threshold = 3;

    let source = Arc::new(SimulatedWeb {
        calls: AtomicU32::new(0),
    });
    let orchestrator = TaskOrchestrator::new(config, source).await?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::TaskExpanded { id, total_items } => {
                    println!("Task {} expanded into {} items", id, total_items);
                }
                Event::CircuitOpened { target, failures } => {
                    println!("Circuit opened for {} after {} failures", target, failures);
                }
                Event::TaskFinished {
                    id,
                    status,
                    succeeded_items,
                    failed_items,
                    skipped_items,
                } => {
                    println!(
                        "Task {} finished as {:?}: {} ok, {} failed, {} skipped",
                        id, status, succeeded_items, failed_items, skipped_items
                    );
                }
                _ => {}
            }
        }
    });

    let task_config = TaskConfig {
        max_concurrent_items: 3,
        retry_attempts: 2,
        ..TaskConfig::default()
    };
    let id = orchestrator
        .submit(task_config, "https://blog.example/")
        .await?;

    loop {
        let snapshot = orchestrator.get_status(id)?;
        println!(
            "{:?}: {}/{} items ({:.0}%)",
            snapshot.status, snapshot.completed_items, snapshot.total_items, snapshot.progress_percent
        );
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let bundle = orchestrator.get_results(id, true, false)?;
    println!(
        "Coverage {:?}, success rate {:.1}%",
        bundle.summary.coverage, bundle.summary.success_rate
    );
    for failure in bundle.errors.unwrap_or_default() {
        println!(
            "  {} {:?}: {}",
            failure.target,
            failure.outcome,
            failure.error.unwrap_or_default()
        );
    }

    orchestrator.shutdown().await?;
    Ok(())
}
