//! # Application State Management
//!
//! Shared state passed to every request handler via actix-web's `web::Data`.
//! Cloning is cheap: the registry and batch client are behind `Arc`s and the
//! configuration is cloned by value once per worker.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionRegistry;
use crate::upstream::batch::BatchClient;

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration loaded at startup
    config: AppConfig,

    /// Admission registry for realtime relay sessions
    pub registry: Arc<SessionRegistry>,

    /// Client for the upstream batch transcription API
    pub batch: Arc<BatchClient>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions));
        let batch = Arc::new(BatchClient::new(&config)?);

        Ok(Self {
            config,
            registry,
            batch,
        })
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.clone()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: AppConfig) -> Self {
        Self::new(config).expect("test state construction")
    }
}
