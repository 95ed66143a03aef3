//! Store lifecycle orchestrator
//!
//! Accepts create and delete requests, takes the per-store lease, and runs the
//! provisioning or teardown workflow on the worker pool:
//!
//! 1. install the release
//! 2. wait for the workloads to become ready
//! 3. run the setup job
//! 4. confirm the release is deployed, then mark the store `Ready`
//!
//! Every step that fails marks the store `Failed` with a message naming the
//! step, and later steps never run.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{
    ProbeOutcome, ProbeTarget, ReadinessProbe, ReleaseDriver, ReleaseStatus, ReleaseSummary,
    ResourceInspector, SetupOutcome, SetupRunner, SetupSpec, StoreResources,
};
use crate::error::{Result, StoreError};
use crate::lease::{Lease, LeaseTable, OperationKind};
use crate::pool::WorkerPool;
use crate::registry::StoreRegistry;
use crate::settings::{OrchestratorSettings, RestartPolicy};
use crate::store::{StoreKind, StoreName, StoreRecord, StoreStatus};

/// Failure message for records found in flight at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub releases: Arc<dyn ReleaseDriver>,
    pub prober: Arc<dyn ReadinessProbe>,
    pub setup: Arc<dyn SetupRunner>,
    pub inspector: Option<Arc<dyn ResourceInspector>>,
}

/// A store record with its live cluster objects
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub record: StoreRecord,
    pub resources: Option<StoreResources>,
}

/// What restart recovery did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: Vec<StoreName>,
    pub retried: Vec<StoreName>,
    pub deletions: Vec<StoreName>,
}

/// How a provisioning workflow ended
enum Step {
    Ready(String),
    Failed(String),
    Cancelled,
}

struct Inner {
    registry: StoreRegistry,
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    leases: LeaseTable,
    pool: WorkerPool,
}

/// Coordinates store lifecycles; cheap to clone
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build an orchestrator and start its worker pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: StoreRegistry,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.workers);
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                collaborators,
                settings,
                leases: LeaseTable::new(),
                pool,
            }),
        })
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Every store in creation order
    pub fn list(&self) -> Vec<StoreRecord> {
        self.inner.registry.list()
    }

    /// One store by (unnormalized) name
    pub fn get(&self, raw_name: &str) -> Result<StoreRecord> {
        let name = lookup_name(raw_name)?;
        self.inner
            .registry
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// One store with the names of its cluster objects
    ///
    /// Resources are only looked up while the store is provisioning or ready;
    /// an inspector failure is logged and leaves them out.
    pub async fn report(&self, raw_name: &str) -> Result<StoreReport> {
        let record = self.get(raw_name)?;

        let resources = match (&self.inner.collaborators.inspector, record.status) {
            (Some(inspector), StoreStatus::Provisioning | StoreStatus::Ready) => {
                match inspector.resources(&record.release_ref).await {
                    Ok(resources) => Some(resources),
                    Err(e) => {
                        tracing::warn!(store = %record.name, error = %e, "failed to inspect store resources");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(StoreReport { record, resources })
    }

    /// Accept a create request and queue provisioning
    ///
    /// Returns the `Requested` record without waiting for the workflow.
    pub async fn create(&self, raw_name: &str, raw_kind: &str) -> Result<StoreRecord> {
        let name = StoreName::parse(raw_name)?;
        let kind = StoreKind::parse(raw_kind)?;
        let inner = &self.inner;

        let lease = inner.leases.acquire(&name, OperationKind::Provision)?;

        let previous = inner.registry.get(&name);
        if let Some(existing) = &previous
            && existing.status != StoreStatus::Failed
        {
            return Err(StoreError::conflict(format!(
                "store '{}' already exists ({})",
                name, existing.status
            )));
        }

        let mut record = StoreRecord::requested(name.clone(), kind, inner.settings.generate_credentials());
        // Continue the failed record's numbering so per-attempt job names never repeat
        if let Some(failed) = previous {
            record.attempt = failed.attempt.saturating_add(1);
        }
        let record = inner.registry.upsert(record).await?;
        tracing::info!(store = %name, id = %record.id, %kind, "store requested");

        let task = Arc::clone(inner).provision(lease);
        if let Err(e) = inner.pool.submit(task) {
            tracing::error!(store = %name, error = %e, "failed to queue provisioning");
            inner
                .registry
                .update(&name, |r| r.mark_failed(e.detail().to_string()))
                .await?;
            return Err(e);
        }

        Ok(record)
    }

    /// Accept a delete request and queue teardown
    ///
    /// An in-flight provision is cancelled first; if it does not let go of
    /// the store within the cancel grace period the request is rejected.
    pub async fn delete(&self, raw_name: &str) -> Result<StoreRecord> {
        let name = lookup_name(raw_name)?;
        let inner = &self.inner;

        let record = inner
            .registry
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if record.status == StoreStatus::Deleting {
            return Err(StoreError::conflict(format!(
                "store '{}' is already being deleted",
                name
            )));
        }

        let lease = match inner.leases.acquire(&name, OperationKind::Delete) {
            Ok(lease) => lease,
            Err(conflict) => match inner.leases.holder(&name) {
                Some(OperationKind::Provision) => {
                    tracing::info!(store = %name, "cancelling in-flight provisioning");
                    let grace = inner.settings.cancel_grace;
                    if !inner.leases.cancel_and_wait(&name, grace).await {
                        return Err(StoreError::conflict(format!(
                            "provisioning of store '{}' did not stop within {:?}",
                            name, grace
                        )));
                    }
                    inner.leases.acquire(&name, OperationKind::Delete)?
                }
                Some(OperationKind::Delete) => {
                    return Err(StoreError::conflict(format!(
                        "store '{}' is already being deleted",
                        name
                    )));
                }
                None => return Err(conflict),
            },
        };

        let record = inner.registry.update(&name, |r| r.mark_deleting()).await?;
        tracing::info!(store = %name, "store deleting");

        let task = Arc::clone(inner).teardown(lease);
        if let Err(e) = inner.pool.submit(task) {
            tracing::error!(store = %name, error = %e, "failed to queue deletion");
            inner
                .registry
                .update(&name, |r| r.mark_failed(format!("deletion failed: {}", e.detail())))
                .await?;
            return Err(e);
        }

        Ok(record)
    }

    /// Reconcile records left in flight by a previous process
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let inner = &self.inner;
        let mut report = RecoveryReport::default();

        for record in inner.registry.list() {
            let name = record.name.clone();
            match record.status {
                StoreStatus::Requested | StoreStatus::Provisioning => {
                    match inner.settings.restart_policy {
                        RestartPolicy::Fail => {
                            inner
                                .registry
                                .update(&name, |r| r.mark_failed(INTERRUPTED_MESSAGE))
                                .await?;
                            tracing::warn!(store = %name, status = %record.status, "provisioning interrupted by restart");
                            report.failed.push(name);
                        }
                        RestartPolicy::Retry => {
                            let lease = inner.leases.acquire(&name, OperationKind::Provision)?;
                            if record.status == StoreStatus::Provisioning {
                                inner.registry.update(&name, |r| r.mark_retry()).await?;
                            }
                            inner.pool.submit(Arc::clone(inner).provision(lease))?;
                            tracing::info!(store = %name, "retrying interrupted provisioning");
                            report.retried.push(name);
                        }
                    }
                }
                StoreStatus::Deleting => {
                    let lease = inner.leases.acquire(&name, OperationKind::Delete)?;
                    inner.pool.submit(Arc::clone(inner).teardown(lease))?;
                    tracing::info!(store = %name, "resuming interrupted deletion");
                    report.deletions.push(name);
                }
                StoreStatus::Ready | StoreStatus::Failed => {}
            }
        }

        Ok(report)
    }

    /// Create `Ready` records for deployed releases the registry does not know
    pub async fn adopt(&self) -> Result<Vec<StoreName>> {
        let inner = &self.inner;
        let releases = inner.collaborators.releases.list().await?;
        let mut adopted = Vec::new();

        for summary in releases {
            let Some((name, kind)) = adoptable(&summary) else {
                continue;
            };
            if inner.registry.contains(&name) {
                continue;
            }
            // Skip names with a request racing us
            let Ok(_lease) = inner.leases.acquire(&name, OperationKind::Provision) else {
                continue;
            };

            let url = inner.settings.store_url(&name);
            inner
                .registry
                .upsert(StoreRecord::adopted(name.clone(), kind, url))
                .await?;
            tracing::info!(store = %name, release = %summary.release, "adopted existing release");
            adopted.push(name);
        }

        Ok(adopted)
    }

    /// Whether a lifecycle task currently holds `name`
    pub fn is_busy(&self, raw_name: &str) -> bool {
        lookup_name(raw_name)
            .map(|name| self.inner.leases.is_held(&name))
            .unwrap_or(false)
    }

    /// Wait until no lifecycle task holds `name`
    pub async fn wait_idle(&self, raw_name: &str, timeout: Duration) -> bool {
        match lookup_name(raw_name) {
            Ok(name) => self.inner.leases.wait_released(&name, timeout).await,
            Err(_) => true,
        }
    }

    /// Stop accepting work and wait up to `grace` for queued tasks
    pub async fn shutdown(&self, grace: Duration) {
        let pending = self.inner.pool.pending();
        if tokio::time::timeout(grace, self.inner.pool.shutdown())
            .await
            .is_err()
        {
            tracing::warn!(pending, "lifecycle tasks still running at shutdown");
        }
    }
}

impl Inner {
    async fn provision(self: Arc<Self>, lease: Lease) {
        if !lease.start() {
            tracing::debug!(store = %lease.name(), "provisioning cancelled before it started");
            return;
        }

        let record = match self.commit(&lease, |r| r.mark_provisioning()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(store = %lease.name(), error = %e, "could not start provisioning");
                return;
            }
        };
        tracing::info!(store = %record.name, attempt = record.attempt, "store provisioning");

        match self.run_provision(&lease, &record).await {
            Step::Ready(url) => {
                match self.commit(&lease, |r| r.mark_ready(url.clone())).await {
                    Ok(_) => tracing::info!(store = %record.name, %url, "store ready"),
                    Err(e) => tracing::error!(store = %record.name, error = %e, "failed to record ready store"),
                }
            }
            Step::Failed(message) => {
                tracing::error!(store = %record.name, error = %message, "provisioning failed");
                if self.settings.uninstall_on_failure && !lease.is_cancelled() {
                    self.cleanup_release(&record).await;
                }
                if let Err(e) = self.commit(&lease, |r| r.mark_failed(message.clone())).await {
                    tracing::error!(store = %record.name, error = %e, "failed to record provisioning failure");
                }
            }
            Step::Cancelled => {
                tracing::info!(store = %record.name, "provisioning cancelled");
            }
        }
    }

    async fn run_provision(&self, lease: &Lease, record: &StoreRecord) -> Step {
        let token = lease.token();
        let settings = &self.settings;
        let releases = &self.collaborators.releases;

        let Some(credentials) = record.credentials.clone() else {
            return Step::Failed("release install failed: store has no credentials".to_string());
        };

        tracing::debug!(store = %record.name, step = "install", release = %record.release_ref);
        let params = settings.install_parameters(&record.name, credentials.clone());
        let installed = tokio::select! {
            _ = token.cancelled() => return Step::Cancelled,
            result = releases.install(&record.release_ref, &params) => result,
        };
        if let Err(e) = installed {
            return Step::Failed(format!("release install failed: {}", e.detail()));
        }

        if token.is_cancelled() {
            return Step::Cancelled;
        }

        tracing::debug!(store = %record.name, step = "readiness");
        let mut target = ProbeTarget::for_release(&record.release_ref);
        if let Some(url) = settings.probe_url(&record.name) {
            target = target.with_http_url(url);
        }
        match self
            .collaborators
            .prober
            .wait_healthy(&target, settings.probe_timeout, settings.probe_interval, token)
            .await
        {
            ProbeOutcome::Healthy => {}
            ProbeOutcome::TimedOut { last_observation } => {
                return Step::Failed(format!(
                    "workload did not become healthy within {:?}: {}",
                    settings.probe_timeout, last_observation
                ));
            }
            ProbeOutcome::Cancelled => return Step::Cancelled,
        }

        if token.is_cancelled() {
            return Step::Cancelled;
        }

        tracing::debug!(store = %record.name, step = "setup", attempt = record.attempt);
        let url = settings.store_url(&record.name);
        let spec = SetupSpec {
            store: record.name.clone(),
            kind: record.kind,
            release: record.release_ref.clone(),
            url: url.clone(),
            attempt: record.attempt,
            credentials,
            timeout: settings.setup_timeout,
        };
        match self.collaborators.setup.run(&spec, token).await {
            SetupOutcome::Succeeded => {}
            SetupOutcome::Failed(reason) => {
                return Step::Failed(format!("setup job failed: {}", reason));
            }
            SetupOutcome::TimedOut => {
                return Step::Failed(format!(
                    "setup job timed out after {:?}",
                    settings.setup_timeout
                ));
            }
            SetupOutcome::Unknown(reason) => {
                return Step::Failed(format!("setup job outcome unknown: {}", reason));
            }
            SetupOutcome::Cancelled => return Step::Cancelled,
        }

        if token.is_cancelled() {
            return Step::Cancelled;
        }

        tracing::debug!(store = %record.name, step = "status");
        let status = tokio::select! {
            _ = token.cancelled() => return Step::Cancelled,
            status = releases.status(&record.release_ref) => status,
        };
        if status == ReleaseStatus::Deployed {
            Step::Ready(url)
        } else {
            Step::Failed(format!("release did not stabilize (status: {})", status))
        }
    }

    async fn teardown(self: Arc<Self>, lease: Lease) {
        if !lease.start() {
            return;
        }
        let name = lease.name().clone();
        let Some(record) = self.registry.get(&name) else {
            tracing::warn!(store = %name, "store vanished before teardown");
            return;
        };

        match self.collaborators.releases.uninstall(&record.release_ref).await {
            Ok(()) => match self.registry.remove(&name).await {
                Ok(()) => tracing::info!(store = %name, "store deleted"),
                Err(e) => {
                    tracing::error!(store = %name, error = %e, "failed to remove store record");
                    self.fail_deletion(&lease, e.detail()).await;
                }
            },
            Err(e) => {
                tracing::error!(store = %name, error = %e, "uninstall failed");
                self.fail_deletion(&lease, e.detail()).await;
            }
        }
    }

    async fn fail_deletion(&self, lease: &Lease, cause: &str) {
        let message = format!("deletion failed: {}", cause);
        if let Err(e) = self.commit(lease, |r| r.mark_failed(message)).await {
            tracing::error!(store = %lease.name(), error = %e, "failed to record deletion failure");
        }
    }

    async fn cleanup_release(&self, record: &StoreRecord) {
        match self.collaborators.releases.uninstall(&record.release_ref).await {
            Ok(()) => tracing::info!(store = %record.name, "removed partial release"),
            Err(e) => {
                tracing::warn!(store = %record.name, error = %e, "failed to remove partial release")
            }
        }
    }

    /// Write through the registry only while `lease` is current
    async fn commit<F>(&self, lease: &Lease, f: F) -> Result<StoreRecord>
    where
        F: FnOnce(&mut StoreRecord) -> Result<()>,
    {
        lease.check()?;
        self.registry.update(lease.name(), f).await
    }
}

/// Names that fail validation can never exist, so lookups report `NotFound`
fn lookup_name(raw: &str) -> Result<StoreName> {
    StoreName::parse(raw).map_err(|_| StoreError::NotFound(crate::store::normalize(raw)))
}

/// Store name and kind for a listed release that follows the naming scheme
fn adoptable(summary: &ReleaseSummary) -> Option<(StoreName, StoreKind)> {
    if summary.status != ReleaseStatus::Deployed {
        return None;
    }
    let kind = StoreKind::WooCommerce;
    let prefix = format!("{}-", kind.release_prefix());
    let raw = summary.release.release.strip_prefix(&prefix)?;
    let name = StoreName::parse(raw).ok()?;
    (name.as_str() == raw && kind.release_ref(&name) == summary.release).then_some((name, kind))
}
