//! Application state for the API server

use crate::{Config, TaskOrchestrator};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; both fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator answering every request
    pub orchestrator: Arc<TaskOrchestrator>,

    /// Configuration, used for submission defaults
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(orchestrator: Arc<TaskOrchestrator>, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
        }
    }
}
