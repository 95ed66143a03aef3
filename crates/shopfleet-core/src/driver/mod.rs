//! Collaborators driven by the orchestrator
//!
//! Each external system sits behind a trait so the orchestrator can be tested
//! against scripted fakes (see [`mock`]).

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::credentials::StoreCredentials;
use crate::error::Result;
use crate::store::{ReleaseRef, StoreKind, StoreName};

/// Kubernetes object names are limited to 63 characters
pub const MAX_OBJECT_NAME_LEN: usize = 63;

/// Observed state of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Deployed,
    Pending,
    Failed,
    /// The release does not exist
    Missing,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Missing => "missing",
        }
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a release listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub release: ReleaseRef,
    pub status: ReleaseStatus,
}

/// Values handed to the release tool for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallParameters {
    pub credentials: StoreCredentials,
    pub site_title: String,
    pub ingress_host: String,
    pub persistence_size: String,
    pub storage_class: Option<String>,
    pub cpu_limit: String,
    pub memory_limit: String,
}

/// Release management: the only component that creates cluster resources
#[async_trait]
pub trait ReleaseDriver: Send + Sync {
    /// Install the release, or confirm an existing healthy one
    ///
    /// Idempotent. A release already `Deployed` is left alone; a `Failed` or
    /// `Pending` one is uninstalled first. If the current state cannot be
    /// read nothing is touched and a `Dependency` error is returned. A failed
    /// install is cleaned up and retried once before the error is returned.
    async fn install(&self, release: &ReleaseRef, params: &InstallParameters) -> Result<ReleaseRef>;

    /// Current status; an unreachable tool reports `Pending`, never `Failed`
    async fn status(&self, release: &ReleaseRef) -> ReleaseStatus;

    /// Remove the release and its namespace; a missing release is success
    async fn uninstall(&self, release: &ReleaseRef) -> Result<()>;

    /// Every release the tool knows about
    async fn list(&self) -> Result<Vec<ReleaseSummary>>;
}

/// What the readiness prober polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub namespace: String,
    /// Label selector matching the store's workloads
    pub selector: String,
    /// Optional URL that must answer with the expected status
    pub http_url: Option<String>,
}

impl ProbeTarget {
    /// Workloads of a release, selected by their instance label
    pub fn for_release(release: &ReleaseRef) -> Self {
        Self {
            namespace: release.namespace.clone(),
            selector: format!("app.kubernetes.io/instance={}", release.release),
            http_url: None,
        }
    }

    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = Some(url.into());
        self
    }
}

/// Result of waiting for readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    TimedOut { last_observation: String },
    Cancelled,
}

/// Polls a workload until it is healthy
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Poll every `interval` until healthy, `timeout` elapses or `cancel` fires
    async fn wait_healthy(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> ProbeOutcome;
}

/// Everything the setup workload needs for one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupSpec {
    pub store: StoreName,
    pub kind: StoreKind,
    pub release: ReleaseRef,
    pub url: String,
    pub attempt: u32,
    pub credentials: StoreCredentials,
    pub timeout: Duration,
}

impl SetupSpec {
    /// Per-attempt job name, `<release>-setup-<attempt>`
    pub fn job_name(&self) -> String {
        let suffix = format!("-setup-{}", self.attempt);
        let keep = MAX_OBJECT_NAME_LEN.saturating_sub(suffix.len());
        let base: String = self.release.release.chars().take(keep).collect();
        format!("{}{}", base.trim_end_matches('-'), suffix)
    }
}

/// Terminal outcome of the setup workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
    /// The outcome could not be observed
    Unknown(String),
    Cancelled,
}

/// Launches the setup workload once per attempt and watches it
#[async_trait]
pub trait SetupRunner: Send + Sync {
    async fn run(&self, spec: &SetupSpec, cancel: &CancellationToken) -> SetupOutcome;
}

/// Names of the cluster objects belonging to one store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResources {
    pub namespace: String,
    pub deployments: Vec<String>,
    pub services: Vec<String>,
    pub ingresses: Vec<String>,
    pub pvcs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only view of a store's cluster objects
#[async_trait]
pub trait ResourceInspector: Send + Sync {
    async fn resources(&self, release: &ReleaseRef) -> Result<StoreResources>;
}
