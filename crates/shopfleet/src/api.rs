//! HTTP status API
//!
//! | method | path | success |
//! |---|---|---|
//! | GET | `/` | 200 health message |
//! | GET | `/api/stores` | 200 stores in creation order |
//! | POST | `/api/stores` | 202 accepted store |
//! | GET | `/api/stores/{name}` | 200 store |
//! | GET | `/api/stores/{name}/status` | 200 status with cluster resources |
//! | DELETE | `/api/stores/{name}` | 202 deletion accepted |
//!
//! Handlers never wait for a lifecycle workflow; clients poll for progress.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use shopfleet_core::{Orchestrator, StoreRecord, StoreReport, StoreResources};

use crate::error::ApiError;

/// Store as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub url: Option<String>,
    pub error: Option<String>,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoreRecord> for StoreView {
    fn from(record: &StoreRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.to_string(),
            kind: record.kind.as_str().to_string(),
            status: record.status.as_str().to_string(),
            url: record.url.clone(),
            error: record.error_message.clone(),
            namespace: record.release_ref.namespace.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Body of `GET /api/stores/{name}/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub name: String,
    pub status: String,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_resources: Option<StoreResources>,
}

impl From<StoreReport> for StatusView {
    fn from(report: StoreReport) -> Self {
        Self {
            name: report.record.name.to_string(),
            status: report.record.status.as_str().to_string(),
            url: report.record.url,
            kubernetes_resources: report.resources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub store: StoreView,
}

#[derive(Debug, Default, Deserialize)]
struct CreateStoreRequest {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Build the API router
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/stores", get(list_stores).post(create_store))
        .route("/api/stores/{name}", get(get_store).delete(delete_store))
        .route("/api/stores/{name}/status", get(store_status))
        .with_state(orchestrator)
}

async fn health() -> Json<Value> {
    Json(json!({
        "message": "Shopfleet store orchestrator is running",
        "status": "healthy",
    }))
}

async fn list_stores(State(orchestrator): State<Orchestrator>) -> Json<Vec<StoreView>> {
    Json(orchestrator.list().iter().map(StoreView::from).collect())
}

async fn get_store(
    State(orchestrator): State<Orchestrator>,
    Path(name): Path<String>,
) -> Result<Json<StoreView>, ApiError> {
    let record = orchestrator.get(&name)?;
    Ok(Json(StoreView::from(&record)))
}

async fn store_status(
    State(orchestrator): State<Orchestrator>,
    Path(name): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    let report = orchestrator.report(&name).await?;
    Ok(Json(StatusView::from(report)))
}

async fn create_store(
    State(orchestrator): State<Orchestrator>,
    payload: Result<Json<CreateStoreRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StoreView>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let name = request.name.unwrap_or_default();
    let kind = request.kind.unwrap_or_default();
    let record = orchestrator.create(&name, &kind).await?;

    Ok((StatusCode::ACCEPTED, Json(StoreView::from(&record))))
}

async fn delete_store(
    State(orchestrator): State<Orchestrator>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let record = orchestrator.delete(&name).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DeleteResponse {
            message: format!("Store '{}' is being deleted", record.name),
            store: StoreView::from(&record),
        }),
    ))
}
