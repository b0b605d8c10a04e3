//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use modelconv_core::config::AppConfig;
use modelconv_pipeline::RequestOrchestrator;

/// Shared application state, cloned into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// Conversion pipeline.
    pub orchestrator: Arc<RequestOrchestrator>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Build state from configuration and an orchestrator.
    pub fn new(config: AppConfig, orchestrator: RequestOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            started_at: Instant::now(),
        }
    }
}
