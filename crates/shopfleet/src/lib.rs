//! Shopfleet - Store lifecycle orchestrator
//!
//! The server half of Shopfleet:
//! - `api`: axum router exposing the status API
//! - `config`: YAML server configuration
//! - `logging`: tracing subscriber setup

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

pub use api::{DeleteResponse, StatusView, StoreView, router};
pub use config::ServerConfig;
pub use error::{ApiError, ServerError};

use shopfleet_core::Orchestrator;
use std::future::Future;
use tokio::net::TcpListener;

/// Serve the API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, orchestrator: Orchestrator, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "status API listening");
    }
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
}
