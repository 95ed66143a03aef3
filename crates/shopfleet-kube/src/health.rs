//! Readiness probing for store workloads
//!
//! A store is healthy when every Deployment and StatefulSet of its release is
//! fully rolled out:
//! - All replicas are updated (running the new spec)
//! - All replicas are ready (passing readiness probe)
//! - All replicas are available (not being terminated)
//!
//! and, when an HTTP URL is configured, the storefront answers with the
//! expected status code.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{Api, ListParams};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use shopfleet_core::{ProbeOutcome, ProbeTarget, ReadinessProbe};

use crate::error::{KubeError, Result};

/// HTTP side of the readiness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// Status code the storefront must answer with
    pub expected_status: u16,

    /// Timeout for a single HTTP request
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            expected_status: 200,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Rollout state of one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadHealth {
    pub kind: &'static str,
    pub name: String,
    pub healthy: bool,
    /// Why the workload is not healthy yet
    pub message: Option<String>,
}

impl WorkloadHealth {
    fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{}/{}: {}", self.kind, self.name, message),
            None => format!("{}/{}: not ready", self.kind, self.name),
        }
    }
}

/// Health of a Deployment from its spec and status
pub fn deployment_health(deployment: &Deployment) -> WorkloadHealth {
    let name = deployment.metadata.name.clone().unwrap_or_default();
    let spec = deployment.spec.as_ref();
    let status = deployment.status.as_ref();

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    let healthy = ready == desired && updated == desired && available == desired;

    let message = if healthy {
        None
    } else {
        let conditions = status
            .and_then(|s| s.conditions.as_ref())
            .map(|c| {
                c.iter()
                    .filter(|cond| cond.status == "False")
                    .filter_map(|cond| {
                        cond.message
                            .as_ref()
                            .map(|m| format!("{}: {}", cond.type_, m))
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|s| !s.is_empty());

        Some(conditions.unwrap_or_else(|| {
            format!(
                "{}/{} ready, {}/{} updated, {}/{} available",
                ready, desired, updated, desired, available, desired
            )
        }))
    };

    WorkloadHealth {
        kind: "Deployment",
        name,
        healthy,
        message,
    }
}

/// Health of a StatefulSet; the rollout must also have converged on one revision
pub fn statefulset_health(sts: &StatefulSet) -> WorkloadHealth {
    let name = sts.metadata.name.clone().unwrap_or_default();
    let spec = sts.spec.as_ref();
    let status = sts.status.as_ref();

    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let current = status.and_then(|s| s.current_replicas).unwrap_or(0);

    let current_rev = status.and_then(|s| s.current_revision.as_ref());
    let update_rev = status.and_then(|s| s.update_revision.as_ref());
    let revision_match = current_rev == update_rev;

    let healthy = ready == desired && current == desired && revision_match;

    let message = (!healthy).then(|| {
        format!(
            "{}/{} ready, {}/{} current, revision match: {}",
            ready, desired, current, desired, revision_match
        )
    });

    WorkloadHealth {
        kind: "StatefulSet",
        name,
        healthy,
        message,
    }
}

/// Lists the workloads behind a probe target
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn workloads(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadHealth>>;
}

/// Workloads read from the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloads {
    client: kube::Client,
}

impl KubeWorkloads {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadSource for KubeWorkloads {
    async fn workloads(&self, namespace: &str, selector: &str) -> Result<Vec<WorkloadHealth>> {
        let lp = ListParams::default().labels(selector);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);

        let (deployments, statefulsets) =
            futures::try_join!(deployments.list(&lp), statefulsets.list(&lp))?;

        Ok(deployments
            .items
            .iter()
            .map(deployment_health)
            .chain(statefulsets.items.iter().map(statefulset_health))
            .collect())
    }
}

/// Polls workloads and the storefront until both report healthy
pub struct KubeReadinessProber<W = KubeWorkloads> {
    source: W,
    http: reqwest::Client,
    config: ProbeConfig,
}

impl KubeReadinessProber<KubeWorkloads> {
    pub fn new(client: kube::Client, config: ProbeConfig) -> Result<Self> {
        Self::with_source(KubeWorkloads::new(client), config)
    }
}

impl<W: WorkloadSource> KubeReadinessProber<W> {
    pub fn with_source(source: W, config: ProbeConfig) -> Result<Self> {
        if config.http_timeout.is_zero() {
            return Err(KubeError::InvalidConfig(
                "probe HTTP timeout must be non-zero".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            source,
            http,
            config,
        })
    }

    /// One observation; `Err` carries what is still missing
    pub async fn observe(&self, target: &ProbeTarget) -> std::result::Result<(), String> {
        let workloads = self
            .source
            .workloads(&target.namespace, &target.selector)
            .await
            .map_err(|e| format!("workload query failed: {}", e))?;

        if workloads.is_empty() {
            return Err(format!("no workloads match {}", target.selector));
        }

        let waiting: Vec<String> = workloads
            .iter()
            .filter(|w| !w.healthy)
            .map(WorkloadHealth::describe)
            .collect();
        if !waiting.is_empty() {
            return Err(waiting.join("; "));
        }

        match &target.http_url {
            Some(url) => self.check_http(url).await,
            None => Ok(()),
        }
    }

    async fn check_http(&self, url: &str) -> std::result::Result<(), String> {
        match self.http.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == self.config.expected_status {
                    Ok(())
                } else {
                    Err(format!(
                        "{} answered {} (expected {})",
                        url, status, self.config.expected_status
                    ))
                }
            }
            Err(e) => Err(format!("{} unreachable: {}", url, e)),
        }
    }
}

#[async_trait]
impl<W: WorkloadSource> ReadinessProbe for KubeReadinessProber<W> {
    async fn wait_healthy(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let deadline = Instant::now() + timeout;
        let mut last_observation = "no observation yet".to_string();

        loop {
            let observed = tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
                observed = tokio::time::timeout_at(deadline, self.observe(target)) => observed,
            };

            match observed {
                Ok(Ok(())) => return ProbeOutcome::Healthy,
                Ok(Err(observation)) => {
                    tracing::debug!(namespace = %target.namespace, %observation, "store not ready");
                    last_observation = observation;
                }
                Err(_) => return ProbeOutcome::TimedOut { last_observation },
            }

            let now = Instant::now();
            if now >= deadline {
                return ProbeOutcome::TimedOut { last_observation };
            }

            let pause = interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
