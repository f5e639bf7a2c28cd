//! Error types for crawl-orchestrator
//!
//! Two layers of errors live here:
//! - [`Error`] is returned by the orchestrator's public operations (submission,
//!   queries, persistence, the HTTP server).
//! - [`WorkError`] is raised by a [`WorkSource`](crate::source::WorkSource) for a
//!   single unit of work and is classified as transient or permanent by the
//!   retry policy. It never escapes the scheduling loop as an [`Error`].
//!
//! [`ToHttpStatus`] and [`ApiError`] map [`Error`] onto HTTP responses.

use crate::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for crawl-orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for crawl-orchestrator
#[derive(Debug, Error)]
pub enum Error {
    /// Submission rejected before entering execution
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Human-readable description of the problem
        message: String,
        /// The offending configuration key (e.g. "max_concurrent_items")
        key: Option<String>,
    },

    /// No task with this id is known (never submitted, or already evicted)
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Full results were requested but the task has not reached a terminal status
    #[error("task {id} is not ready (status: {status})")]
    NotReady {
        /// Task being queried
        id: TaskId,
        /// Status at query time
        status: TaskStatus,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfig`] naming the offending key
    pub fn invalid_config(key: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure of a single unit of work, as reported by a work source
///
/// The variant decides whether the retry policy schedules another attempt:
/// `Timeout` and `Connection` are transient, `Permanent` and `Cancelled` are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// The attempt did not finish within its deadline
    #[error("timed out")]
    Timeout,

    /// Transport-level failure reaching the target
    #[error("connection error: {0}")]
    Connection(String),

    /// The target can never succeed (malformed, rejected, unparseable)
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The source observed cancellation and gave up on its own
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for WorkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return WorkError::Timeout;
        }
        if let Some(status) = e.status() {
            return if status.as_u16() == 429 || status.is_server_error() {
                WorkError::Connection(format!("HTTP {}", status))
            } else {
                WorkError::Permanent(format!("HTTP {}", status))
            };
        }
        if e.is_connect() || e.is_request() {
            return WorkError::Connection(e.to_string());
        }
        WorkError::Permanent(e.to_string())
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "task_not_found",
///     "message": "task not found: 5f0c...",
///     "details": { "task_id": "5f0c..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "task_not_found", "invalid_config")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::InvalidConfig { .. } => 400,
            Error::TaskNotFound(_) => 404,
            Error::NotReady { .. } => 409,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::Network(_) => 502,

            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::InvalidConfig { .. } => "invalid_config",
            Error::TaskNotFound(_) => "task_not_found",
            Error::NotReady { .. } => "not_ready",
            Error::ShuttingDown => "shutting_down",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Network(_) => "network_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InvalidConfig { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::TaskNotFound(id) => Some(serde_json::json!({
                "task_id": id,
            })),
            Error::NotReady { id, status } => Some(serde_json::json!({
                "task_id": id,
                "status": status,
            })),
            _ => None,
        };

        Self {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
