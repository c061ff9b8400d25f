//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, SPEECHMATICS_API_KEY, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The Speechmatics API key is configuration-sourced only. There is no
//! built-in fallback key; startup fails if it is absent.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speechmatics: SpeechmaticsConfig,
    pub session: SessionConfig,
    pub batch: BatchConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream Speechmatics connection settings.
///
/// ## Fields:
/// - `api_key`: Bearer token for both the realtime socket and the batch job API.
///   Required; the process refuses to start without it.
/// - `realtime_url`: WebSocket endpoint for realtime transcription sessions
/// - `batch_api_url`: Base URL of the batch job API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechmaticsConfig {
    pub api_key: String,
    pub realtime_url: String,
    pub batch_api_url: String,
}

/// Realtime session tuning.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Admission cap for simultaneously active relay sessions
/// - `keepalive_interval_secs`: How often each session pings its client connection
/// - `max_delay_seconds`: Upper bound on upstream transcript latency (passed through
///   to the upstream transcription configuration)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    pub keepalive_interval_secs: u64,
    pub max_delay_seconds: f32,
}

/// Batch transcription polling behavior.
///
/// ## Tuning guidelines:
/// - `poll_interval_ms`: Sleep between job status polls
/// - `max_poll_attempts`: Poll budget before the job is reported as timed out
/// - `max_retries`: Per-call retry budget for transient upstream failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            speechmatics: SpeechmaticsConfig {
                // No default key. Supplied via SPEECHMATICS_API_KEY or config.toml.
                api_key: String::new(),
                realtime_url: "wss://eu2.rt.speechmatics.com/v2".to_string(),
                batch_api_url: "https://asr.api.speechmatics.com/v2".to_string(),
            },
            session: SessionConfig {
                max_concurrent_sessions: 2,
                keepalive_interval_secs: 30,
                max_delay_seconds: 2.0,
            },
            batch: BatchConfig {
                poll_interval_ms: 2000,
                max_poll_attempts: 60,
                max_retries: 3,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `SPEECHMATICS_API_KEY=...`: Upstream credentials (no APP_ prefix)
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment-platform variables that don't follow the APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // The upstream credential is conventionally named after the provider.
        if let Ok(key) = env::var("SPEECHMATICS_API_KEY") {
            settings = settings.set_override("speechmatics.api_key", key)?;
        }

        if let Ok(url) = env::var("SPEECHMATICS_RT_URL") {
            settings = settings.set_override("speechmatics.realtime_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The session admission cap allows at least one session
    /// - The Speechmatics API key is present (the process must not start without it)
    /// - The batch poll budget allows at least one attempt
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.speechmatics.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "SPEECHMATICS_API_KEY is not set. Provide it via the environment or config.toml"
            ));
        }

        if self.batch.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("Batch max poll attempts must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.max_concurrent_sessions, 2);
        assert_eq!(config.session.keepalive_interval_secs, 30);
    }

    /// The default config has no API key and must be rejected at startup.
    #[test]
    fn test_missing_api_key_fails_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_with_api_key_validates() {
        let mut config = AppConfig::default();
        config.speechmatics.api_key = "test-key".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_port_zero() {
        let mut config = AppConfig::default();
        config.speechmatics.api_key = "test-key".to_string();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_session_cap() {
        let mut config = AppConfig::default();
        config.speechmatics.api_key = "test-key".to_string();
        config.session.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }
}
