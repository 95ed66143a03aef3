//! Error types for shopfleet-kube

use shopfleet_core::StoreError;
use thiserror::Error;

/// Result type for shopfleet-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to the cluster or the release tool
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The helm CLI exited with an error
    #[error("helm {command} failed: {message}")]
    Helm { command: String, message: String },

    /// A command or API call exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// IO error (spawning the release tool, reading files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// HTTP readiness check error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

impl From<KubeError> for StoreError {
    fn from(e: KubeError) -> Self {
        match e {
            KubeError::Timeout(_) => StoreError::Timeout(e.to_string()),
            KubeError::InvalidConfig(message) => StoreError::InvalidArgument(message),
            other => StoreError::Dependency(other.to_string()),
        }
    }
}
