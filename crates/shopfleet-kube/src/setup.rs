//! Post-install setup job
//!
//! Each provisioning attempt launches exactly one Job named
//! `<release>-setup-<attempt>` and watches it until it reaches a terminal
//! condition. A job that already exists with that name belongs to the same
//! attempt and is watched instead of recreated.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams, PropagationPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use shopfleet_core::{SetupOutcome, SetupRunner, SetupSpec};

use crate::error::{KubeError, Result};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "shopfleet";
pub const STORE_LABEL: &str = "shopfleet.io/store";
pub const COMPONENT_LABEL: &str = "shopfleet.io/component";

/// Finished jobs are garbage collected after ten minutes
const TTL_AFTER_FINISHED: i32 = 600;

/// Setup job settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupConfig {
    pub image: String,

    /// Container command; store details arrive as environment variables
    pub command: Vec<String>,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Consecutive failed reads before the outcome is reported unknown
    pub max_watch_errors: u32,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            image: "wordpress:cli".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "wp --info && echo \"store $STORE_NAME configured at $STORE_URL\"".to_string(),
            ],
            poll_interval: Duration::from_secs(5),
            max_watch_errors: 5,
        }
    }
}

impl SetupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(KubeError::InvalidConfig("setup image must not be empty".into()));
        }
        if self.command.is_empty() {
            return Err(KubeError::InvalidConfig("setup command must not be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(KubeError::InvalidConfig(
                "setup poll interval must be non-zero".into(),
            ));
        }
        if self.max_watch_errors == 0 {
            return Err(KubeError::InvalidConfig(
                "setup maxWatchErrors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Build the Job object for one attempt
pub fn build_job(spec: &SetupSpec, config: &SetupConfig) -> Job {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (STORE_LABEL.to_string(), spec.store.as_str().to_string()),
        (COMPONENT_LABEL.to_string(), "setup".to_string()),
    ]);

    let creds = &spec.credentials;
    let container = Container {
        name: "setup".to_string(),
        image: Some(config.image.clone()),
        command: Some(config.command.clone()),
        env: Some(vec![
            env("STORE_NAME", spec.store.as_str()),
            env("STORE_KIND", spec.kind.as_str()),
            env("STORE_URL", &spec.url),
            env("STORE_NAMESPACE", &spec.release.namespace),
            env("RELEASE_NAME", &spec.release.release),
            env("ADMIN_USER", &creds.admin_user),
            env("ADMIN_PASSWORD", &creds.admin_password),
            env("ADMIN_EMAIL", &creds.admin_email),
            env("DB_PASSWORD", &creds.db_password),
        ]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.job_name()),
            namespace: Some(spec.release.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(spec.timeout.as_secs().max(1) as i64),
            ttl_seconds_after_finished: Some(TTL_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Job condition reason set when `activeDeadlineSeconds` elapses
const DEADLINE_EXCEEDED: &str = "DeadlineExceeded";

/// Where a job stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Running(String),
    Succeeded,
    Failed(String),
    /// Killed by `activeDeadlineSeconds`
    DeadlineExceeded,
}

/// Classify a job from its status conditions and counters
pub fn classify_job(job: &Job) -> JobPhase {
    let status = job.status.as_ref();
    let conditions = status.and_then(|s| s.conditions.as_ref());
    let condition = |type_: &str| {
        conditions.and_then(|c| {
            c.iter()
                .find(|cond| cond.type_ == type_ && cond.status == "True")
        })
    };

    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    if condition("Complete").is_some() || succeeded > 0 {
        return JobPhase::Succeeded;
    }

    if let Some(failed) = condition("Failed") {
        if failed.reason.as_deref() == Some(DEADLINE_EXCEEDED) {
            return JobPhase::DeadlineExceeded;
        }
        let reason = failed
            .message
            .clone()
            .or_else(|| failed.reason.clone())
            .unwrap_or_else(|| "job failed".to_string());
        return JobPhase::Failed(reason);
    }

    let active = status.and_then(|s| s.active).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    JobPhase::Running(format!("{} active, {} failed", active, failed))
}

/// Result of submitting a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Job operations the runner needs
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create(&self, namespace: &str, job: &Job) -> Result<CreateOutcome>;

    /// `None` when the job does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Delete the job and its pods; a missing job is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Jobs through the Kubernetes API
#[derive(Clone)]
pub struct KubeJobs {
    client: kube::Client,
}

impl KubeJobs {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl JobClient for KubeJobs {
    async fn create(&self, namespace: &str, job: &Job) -> Result<CreateOutcome> {
        match self.api(namespace).create(&PostParams::default(), job).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.api(namespace).delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }
}

/// Runs the setup job and watches it to a terminal outcome
pub struct KubeSetupRunner<C = KubeJobs> {
    jobs: C,
    config: SetupConfig,
}

impl KubeSetupRunner<KubeJobs> {
    pub fn new(client: kube::Client, config: SetupConfig) -> Result<Self> {
        Self::with_client(KubeJobs::new(client), config)
    }
}

impl<C: JobClient> KubeSetupRunner<C> {
    pub fn with_client(jobs: C, config: SetupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { jobs, config })
    }

    async fn abandon(&self, namespace: &str, name: &str) {
        if let Err(e) = self.jobs.delete(namespace, name).await {
            tracing::warn!(job = name, namespace, error = %e, "failed to delete setup job");
        }
    }

    async fn watch(&self, namespace: &str, name: &str, deadline: Instant) -> SetupOutcome {
        let mut errors = 0u32;

        loop {
            match self.jobs.get(namespace, name).await {
                Ok(Some(job)) => {
                    errors = 0;
                    match classify_job(&job) {
                        JobPhase::Succeeded => return SetupOutcome::Succeeded,
                        JobPhase::Failed(reason) => return SetupOutcome::Failed(reason),
                        JobPhase::DeadlineExceeded => return SetupOutcome::TimedOut,
                        JobPhase::Running(progress) => {
                            tracing::debug!(job = name, %progress, "setup job running");
                        }
                    }
                }
                Ok(None) => {
                    return SetupOutcome::Unknown(format!(
                        "job {} disappeared before completing",
                        name
                    ));
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!(job = name, attempt = errors, error = %e, "failed to read setup job");
                    if errors >= self.config.max_watch_errors {
                        return SetupOutcome::Unknown(format!(
                            "lost track of job {} after {} failed reads: {}",
                            name, errors, e
                        ));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return SetupOutcome::TimedOut;
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl<C: JobClient> SetupRunner for KubeSetupRunner<C> {
    async fn run(&self, spec: &SetupSpec, cancel: &CancellationToken) -> SetupOutcome {
        let namespace = spec.release.namespace.as_str();
        let name = spec.job_name();
        let job = build_job(spec, &self.config);

        match self.jobs.create(namespace, &job).await {
            Ok(CreateOutcome::Created) => {
                tracing::info!(job = %name, namespace, "setup job created");
            }
            Ok(CreateOutcome::AlreadyExists) => {
                tracing::info!(job = %name, namespace, "setup job already exists, watching it");
            }
            Err(e) => return SetupOutcome::Failed(format!("could not create job {}: {}", name, e)),
        }

        let deadline = Instant::now() + spec.timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => SetupOutcome::Cancelled,
            outcome = self.watch(namespace, &name, deadline) => outcome,
        };

        match &outcome {
            SetupOutcome::Cancelled | SetupOutcome::TimedOut => self.abandon(namespace, &name).await,
            SetupOutcome::Succeeded => tracing::info!(job = %name, "setup job succeeded"),
            SetupOutcome::Failed(reason) | SetupOutcome::Unknown(reason) => {
                tracing::warn!(job = %name, %reason, "setup job did not succeed")
            }
        }
        outcome
    }
}
