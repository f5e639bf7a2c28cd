//! Common test utilities for crawl-orchestrator integration tests

use async_trait::async_trait;
use crawl_orchestrator::{
    Config, DiscoveredTarget, TaskConfig, WorkContext, WorkError, WorkSource,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Config with millisecond backoff and no jitter
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config.http_source.request_timeout = Duration::from_secs(5);
    config
}

/// Task config with short timeouts
pub fn fast_task_config() -> TaskConfig {
    TaskConfig {
        max_concurrent_items: 4,
        item_timeout: Duration::from_secs(5),
        total_timeout: Duration::from_secs(30),
        retry_attempts: 2,
        max_depth: 1,
        partial_results_ok: true,
        expansion_timeout: Duration::from_secs(5),
    }
}

/// Source that discovers `pages` targets and answers each after `delay`
///
/// Targets whose path contains `/broken/` fail permanently.
#[allow(dead_code)]
pub struct SlowSource {
    pub pages: usize,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: Mutex<HashMap<String, u32>>,
}

#[allow(dead_code)]
impl SlowSource {
    pub fn new(pages: usize, delay: Duration) -> Self {
        Self {
            pages,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl WorkSource for SlowSource {
    async fn discover(
        &self,
        seed: &str,
        _max_depth: u32,
        _ctx: &WorkContext,
    ) -> Result<Vec<DiscoveredTarget>, WorkError> {
        let base = seed.trim_end_matches('/');
        Ok((0..self.pages)
            .map(|i| format!("{}/posts/{}", base, i).into())
            .collect())
    }

    async fn fetch_and_extract(
        &self,
        target: &str,
        ctx: &WorkContext,
    ) -> Result<serde_json::Value, WorkError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::select! {
            _ = ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if target.contains("/broken/") {
            return Err(WorkError::Permanent("HTTP 404".into()));
        }
        Ok(serde_json::json!({ "url": target, "title": format!("Title of {}", target) }))
    }
}
