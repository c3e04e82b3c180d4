//! Discovery error types
//!
//! TigerStyle: Explicit error variants with context.

use herald_idgen::IdError;
use herald_registry::StoreError;
use thiserror::Error;

/// Result type for agent operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Agent-level errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Agent already started
    #[error("agent already started")]
    AlreadyStarted,

    /// Agent not started
    #[error("agent not started")]
    NotStarted,

    /// Configuration rejected at build or start
    #[error("configuration error: {0}")]
    Config(#[from] herald_core::Error),

    /// Coordination-store failure surfaced to the caller
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// ID generator could not be built
    #[error("id error: {0}")]
    Id(#[from] IdError),

    /// Best-effort unpublish did not finish within the shutdown budget
    #[error("shutdown did not finish within {timeout_ms}ms")]
    ShutdownTimeout { timeout_ms: u64 },
}

impl DiscoveryError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config(herald_core::Error::invalid_config(field, reason))
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retriable(),
            _ => false,
        }
    }
}
