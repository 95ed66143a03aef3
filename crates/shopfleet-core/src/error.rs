//! Core error types

use thiserror::Error;

/// Errors surfaced by the registry and the lifecycle orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Bad store name or kind, rejected synchronously
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Name already in use or operation not permitted from the current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown store
    #[error("store '{0}' not found")]
    NotFound(String),

    /// The release tool or the cluster API failed
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Readiness or setup exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Registry corruption or an unexpected state
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by outer layers (HTTP status mapping, logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Conflict,
    NotFound,
    Dependency,
    Timeout,
    Internal,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Dependency(_) => ErrorKind::Dependency,
            StoreError::Timeout(_) => ErrorKind::Timeout,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the category prefix
    pub fn detail(&self) -> &str {
        match self {
            StoreError::InvalidArgument(m)
            | StoreError::Conflict(m)
            | StoreError::NotFound(m)
            | StoreError::Dependency(m)
            | StoreError::Timeout(m)
            | StoreError::Internal(m) => m,
        }
    }

    /// Create an invalid argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Internal(format!("IO error: {}", e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Internal(format!("serialization error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
