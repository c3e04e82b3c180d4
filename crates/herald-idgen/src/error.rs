//! Error types for ID generation
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type for ID operations
pub type IdResult<T> = Result<T, IdError>;

/// ID generation and parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid node id {node_id}: must be < {limit}")]
    InvalidNodeId { node_id: u32, limit: u16 },

    #[error("invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("malformed id '{text}': {reason}")]
    Malformed { text: String, reason: String },

    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("clock reading {ms}ms cannot be encoded in a 17-digit timestamp")]
    ClockOutOfRange { ms: u64 },
}

impl IdError {
    pub fn malformed(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            text: text.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_domain(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<IdError> for herald_core::Error {
    fn from(err: IdError) -> Self {
        match err {
            IdError::InvalidConfig { field, reason } => {
                herald_core::Error::InvalidConfiguration { field, reason }
            }
            IdError::InvalidNodeId { .. } => {
                herald_core::Error::invalid_config("nodeId", err.to_string())
            }
            other => herald_core::Error::internal(other.to_string()),
        }
    }
}
