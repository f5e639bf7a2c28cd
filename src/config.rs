//! Configuration types for crawl-orchestrator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::sync::Semaphore;
use utoipa::ToSchema;

/// Main configuration for [`TaskOrchestrator`](crate::TaskOrchestrator)
///
/// Every field has a default, so `Config::default()` is a working setup with
/// in-memory state only.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Process-wide orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Defaults applied to submissions that do not carry their own task config
    #[serde(default)]
    pub task_defaults: TaskConfig,

    /// Backoff settings shared by every work item
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-target failure isolation
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Optional durable store
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,

    /// Built-in HTTP work source
    #[serde(default)]
    pub http_source: HttpSourceConfig,
}

/// Process-wide orchestrator settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OrchestratorConfig {
    /// Maximum tasks holding an execution slot at once (default: 5)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// How long terminal tasks stay queryable (default: 24 hours)
    #[serde(default = "default_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub retention: Duration,

    /// Interval of the background eviction sweep (default: 10 minutes)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub cleanup_interval: Duration,

    /// Health reports `degraded` once more circuits than this are open (default: 5)
    #[serde(default = "default_degraded_open_circuits")]
    pub degraded_open_circuits: usize,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retention: default_retention(),
            cleanup_interval: default_cleanup_interval(),
            degraded_open_circuits: default_degraded_open_circuits(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Per-task configuration, fixed at submission
///
/// Durations travel as integer milliseconds in JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskConfig {
    /// Items of this task running at once (default: 10)
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items: usize,

    /// Deadline for a single attempt (default: 180 seconds)
    #[serde(default = "default_item_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub item_timeout: Duration,

    /// Deadline for the whole task, measured from when it starts running (default: 30 minutes)
    #[serde(default = "default_total_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub total_timeout: Duration,

    /// Retries after the first attempt (default: 3, so up to 4 attempts)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: i32,

    /// Link discovery depth; 0 processes only the seed (default: 1)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Accept a mix of successes and failures as `PartiallyCompleted` (default: true)
    #[serde(default = "default_true")]
    pub partial_results_ok: bool,

    /// Deadline for the expansion step (default: 300 seconds)
    #[serde(default = "default_expansion_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub expansion_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_items: default_max_concurrent_items(),
            item_timeout: default_item_timeout(),
            total_timeout: default_total_timeout(),
            retry_attempts: default_retry_attempts(),
            max_depth: default_max_depth(),
            partial_results_ok: true,
            expansion_timeout: default_expansion_timeout(),
        }
    }
}

impl TaskConfig {
    /// Reject values that can never run
    ///
    /// Concurrency and timeouts must be positive, retry attempts must not be
    /// negative, and concurrency must fit a semaphore.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_items == 0 {
            return Err(Error::invalid_config(
                "max_concurrent_items",
                "max_concurrent_items must be greater than 0",
            ));
        }
        if self.max_concurrent_items > Semaphore::MAX_PERMITS {
            return Err(Error::invalid_config(
                "max_concurrent_items",
                format!(
                    "max_concurrent_items must be at most {} (got {})",
                    Semaphore::MAX_PERMITS,
                    self.max_concurrent_items
                ),
            ));
        }
        for (key, value) in [
            ("item_timeout", self.item_timeout),
            ("total_timeout", self.total_timeout),
            ("expansion_timeout", self.expansion_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(
                    key,
                    format!("{} must be greater than 0", key),
                ));
            }
        }
        if self.retry_attempts < 0 {
            return Err(Error::invalid_config(
                "retry_attempts",
                format!(
                    "retry_attempts must not be negative (got {})",
                    self.retry_attempts
                ),
            ));
        }
        Ok(())
    }

    /// Total attempts an item may make: the first one plus `retry_attempts`
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.retry_attempts).unwrap_or(0) + 1
    }
}

/// Retry backoff configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub initial_delay: Duration,

    /// Upper bound on any single backoff delay (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a target's circuit (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time an open circuit rejects work before allowing a trial (default: 300 seconds)
    #[serde(default = "default_cooldown", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

/// Durable store configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// SQLite database path (None = in-memory state only)
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub database_path: Option<PathBuf>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Settings of [`HttpWorkSource`](crate::source::HttpWorkSource)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HttpSourceConfig {
    /// Timeout of a single HTTP request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum targets discovery returns (default: 50)
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Keep only links that look like articles (default: true)
    #[serde(default = "default_true")]
    pub article_links_only: bool,

    /// Extracted text is truncated to this many characters (default: 20000)
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            max_links: default_max_links(),
            article_links_only: true,
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_degraded_open_circuits() -> usize {
    5
}

fn default_event_buffer() -> usize {
    1000
}

fn default_max_concurrent_items() -> usize {
    10
}

fn default_item_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_total_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_retry_attempts() -> i32 {
    3
}

fn default_max_depth() -> u32 {
    1
}

fn default_expansion_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("crawl-orchestrator/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_links() -> usize {
    50
}

fn default_max_text_chars() -> usize {
    20_000
}

fn default_true() -> bool {
    true
}

// Durations travel as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
