//! Server error types
//!
//! `ApiError` is what HTTP handlers return; `ServerError` covers startup
//! (configuration, cluster connection, binding the listener) and renders
//! through miette.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use miette::Diagnostic;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

use shopfleet_core::{ErrorKind, StoreError};

/// Error returned by an API handler
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(e) => match e.kind() {
                ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Dependency => StatusCode::BAD_GATEWAY,
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message placed in the `error` field of the response body
    pub fn message(&self) -> String {
        match self {
            Self::BadRequest(message) => message.clone(),
            Self::Store(e) => match e.kind() {
                ErrorKind::InvalidArgument | ErrorKind::Conflict => e.detail().to_string(),
                // Internal details stay in the logs
                ErrorKind::Internal => "internal server error".to_string(),
                _ => e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Store(e) = &self
            && e.kind() == ErrorKind::Internal
        {
            tracing::error!(error = %e, "request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

/// Startup failure of the server binary
#[derive(Debug, Error, Diagnostic)]
pub enum ServerError {
    #[error("failed to read configuration {}: {message}", path.display())]
    #[diagnostic(code(shopfleet::config::io))]
    ConfigIo { path: PathBuf, message: String },

    #[error("failed to parse configuration {}: {message}", path.display())]
    #[diagnostic(
        code(shopfleet::config::parse),
        help("keys are camelCase and durations use units, e.g. probeTimeout: 180s")
    )]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(shopfleet::config::invalid))]
    InvalidConfig { message: String },

    #[error("failed to connect to the Kubernetes cluster: {message}")]
    #[diagnostic(
        code(shopfleet::cluster),
        help("set KUBECONFIG or run inside a cluster with a service account")
    )]
    Cluster { message: String },
}

impl ServerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
