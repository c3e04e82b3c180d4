//! Telemetry and logging setup
//!
//! TigerStyle: Explicit telemetry configuration, installed once per process.
//!
//! Herald logs through `tracing`. Embedding applications usually install
//! their own subscriber; standalone binaries call [`init_telemetry`].

use crate::error::{Error, Result};

/// Default log filter when `RUST_LOG` is unset
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter (EnvFilter syntax)
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the module target in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "herald".to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switch to JSON output
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `HERALD_SERVICE_NAME`: service name (default: "herald")
    /// - `RUST_LOG`: log level filter (default: "info")
    /// - `HERALD_LOG_JSON`: "true" for JSON output
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("HERALD_SERVICE_NAME").unwrap_or_else(|_| "herald".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.into());
        let json = std::env::var("HERALD_LOG_JSON")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            service_name,
            log_level,
            json,
            with_target: true,
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `config.log_level` when set. Fails if a subscriber
/// is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::invalid_config("log_level", e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.with_target);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::TelemetryInitFailed {
        reason: e.to_string(),
    })?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "herald");
        assert_eq!(config.log_level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("test-service")
            .with_log_level("debug")
            .with_json();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "debug");
        assert!(config.json);
    }

    #[test]
    fn test_telemetry_config_from_env() {
        std::env::set_var("HERALD_SERVICE_NAME", "env-service");
        std::env::set_var("HERALD_LOG_JSON", "true");
        let config = TelemetryConfig::from_env();
        std::env::remove_var("HERALD_SERVICE_NAME");
        std::env::remove_var("HERALD_LOG_JSON");

        assert_eq!(config.service_name, "env-service");
        assert!(config.json);
        assert!(config.with_target);
    }
}
