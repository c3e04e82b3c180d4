//! Error types for Herald
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Herald core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Herald core error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Configuration could not be read: {path}, reason: {reason}")]
    ConfigurationUnreadable { path: String, reason: String },

    // =========================================================================
    // Telemetry Errors
    // =========================================================================
    #[error("Telemetry initialization failed: {reason}")]
    TelemetryInitFailed { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Configuration errors are fatal at startup and never retried
    pub fn is_retriable(&self) -> bool {
        false
    }
}
