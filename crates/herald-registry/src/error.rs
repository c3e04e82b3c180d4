//! Coordination-store error types
//!
//! TigerStyle: Explicit error variants with context.
//!
//! Retryable errors are recovered by the lifecycle's next tick or its
//! reconnect path; fatal errors need an operator.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Coordination-store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection to the ensemble is down; the session may still be alive
    #[error("store disconnected: {reason}")]
    Disconnected { reason: String },

    /// The session expired and its ephemeral nodes are gone
    #[error("store session {session_id} expired")]
    SessionExpired { session_id: u64 },

    /// The call did not complete within its budget
    #[error("store operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Credentials were rejected
    #[error("store authentication failed: {reason}")]
    Unauthorized { reason: String },

    /// The session lacks permission on a path
    #[error("store ACL denied {operation} on {path}")]
    AclDenied { operation: String, path: String },

    /// Node data could not be encoded or decoded
    #[error("node data serialization failed: {reason}")]
    Serialization { reason: String },

    /// The ensemble refused the request for a reason no retry will fix
    #[error("store rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    /// The adapter was closed
    #[error("store adapter closed")]
    Closed,
}

impl StoreError {
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::SessionExpired { .. } | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
