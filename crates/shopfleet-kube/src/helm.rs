//! Release driver backed by the helm CLI
//!
//! Install is idempotent: a deployed release is left alone, a broken one is
//! removed first, and a failed install is cleaned up and retried once.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use shopfleet_core::{
    InstallParameters, ReleaseDriver, ReleaseRef, ReleaseStatus, ReleaseSummary, StoreError,
};

use crate::command::{CommandOutput, CommandRunner, ProcessRunner};
use crate::error::{KubeError, Result};

/// Grace added to helm's own `--timeout` before the process is killed
const PROCESS_GRACE: Duration = Duration::from_secs(60);

/// Helm invocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmConfig {
    /// Path or name of the helm binary
    pub binary: String,

    /// Chart reference passed to `helm install`
    pub chart: String,

    /// Extra values file passed with `-f`
    pub values_file: Option<PathBuf>,

    pub kubeconfig: Option<PathBuf>,

    /// Value of helm's `--timeout` for install and uninstall
    #[serde(with = "humantime_serde")]
    pub install_timeout: Duration,

    /// Deadline for quick commands (status, list)
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: "helm".to_string(),
            chart: "oci://registry-1.docker.io/bitnamicharts/wordpress".to_string(),
            values_file: None,
            kubeconfig: None,
            install_timeout: Duration::from_secs(15 * 60),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl HelmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(KubeError::InvalidConfig("helm binary must not be empty".into()));
        }
        if self.chart.trim().is_empty() {
            return Err(KubeError::InvalidConfig("helm chart must not be empty".into()));
        }
        if self.install_timeout.as_secs() == 0 || self.command_timeout.is_zero() {
            return Err(KubeError::InvalidConfig("helm timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// `--set` values for one store
pub fn set_values(params: &InstallParameters) -> Vec<(String, String)> {
    let creds = &params.credentials;
    let mut values = vec![
        ("wordpress.adminUser", creds.admin_user.clone()),
        ("wordpress.adminPassword", creds.admin_password.clone()),
        ("wordpress.adminEmail", creds.admin_email.clone()),
        ("wordpress.siteTitle", params.site_title.clone()),
        ("wordpress.persistence.size", params.persistence_size.clone()),
        ("mariadb.auth.rootPassword", creds.db_password.clone()),
        ("mariadb.auth.password", creds.db_password.clone()),
        ("ingress.host", params.ingress_host.clone()),
        ("resources.limits.cpu", params.cpu_limit.clone()),
        ("resources.limits.memory", params.memory_limit.clone()),
    ];
    if let Some(class) = &params.storage_class {
        values.push(("global.storageClass", class.clone()));
    }

    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Escape characters helm's `--set` parser treats as separators
fn escape_set_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

/// Map helm's `info.status` to a release status
pub fn parse_helm_status(status: &str) -> ReleaseStatus {
    match status {
        "deployed" => ReleaseStatus::Deployed,
        "failed" => ReleaseStatus::Failed,
        // pending-install, pending-upgrade, pending-rollback, uninstalling,
        // superseded, unknown
        _ => ReleaseStatus::Pending,
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    output.stderr.to_lowercase().contains("not found")
}

#[derive(Deserialize)]
struct StatusDocument {
    info: StatusInfo,
}

#[derive(Deserialize)]
struct StatusInfo {
    status: String,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    namespace: String,
    status: String,
}

/// Release driver that shells out to helm
pub struct HelmDriver<R = ProcessRunner> {
    config: HelmConfig,
    runner: R,
    client: Option<kube::Client>,
}

impl HelmDriver<ProcessRunner> {
    /// Driver running the real helm binary; `client` is used to remove store
    /// namespaces after uninstall
    pub fn new(config: HelmConfig, client: kube::Client) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            runner: ProcessRunner,
            client: Some(client),
        })
    }
}

impl<R: CommandRunner> HelmDriver<R> {
    /// Driver with a custom command runner and no namespace cleanup
    pub fn with_runner(config: HelmConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            client: None,
        }
    }

    pub fn config(&self) -> &HelmConfig {
        &self.config
    }

    async fn helm(&self, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        let mut args = args;
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        self.runner.run(&self.config.binary, &args, timeout).await
    }

    fn long_timeout(&self) -> Duration {
        self.config.install_timeout + PROCESS_GRACE
    }

    fn install_args(&self, release: &ReleaseRef, params: &InstallParameters) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            release.release.clone(),
            self.config.chart.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
            "--create-namespace".to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.config.install_timeout.as_secs()),
        ];
        if let Some(values_file) = &self.config.values_file {
            args.push("-f".to_string());
            args.push(values_file.display().to_string());
        }
        for (key, value) in set_values(params) {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, escape_set_value(&value)));
        }
        args
    }

    async fn run_install(&self, release: &ReleaseRef, params: &InstallParameters) -> Result<()> {
        tracing::info!(release = %release, chart = %self.config.chart, "helm install");
        let output = self
            .helm(self.install_args(release, params), self.long_timeout())
            .await?;

        if output.success {
            Ok(())
        } else {
            Err(KubeError::Helm {
                command: "install".to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }

    /// `helm uninstall`; a missing release counts as removed
    async fn uninstall_release(&self, release: &ReleaseRef) -> Result<()> {
        let args = vec![
            "uninstall".to_string(),
            release.release.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.config.install_timeout.as_secs()),
        ];
        let output = self.helm(args, self.long_timeout()).await?;

        if output.success {
            tracing::info!(release = %release, "helm uninstall");
            Ok(())
        } else if is_not_found(&output) {
            tracing::info!(release = %release, "release not found, already uninstalled");
            Ok(())
        } else {
            Err(KubeError::Helm {
                command: "uninstall".to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let Some(client) = &self.client else {
            return Ok(());
        };
        let api: Api<Namespace> = Api::all(client.clone());
        match api.delete(namespace, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::info!(namespace, "namespace deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn query_status(&self, release: &ReleaseRef) -> Result<ReleaseStatus> {
        let args = vec![
            "status".to_string(),
            release.release.clone(),
            "--namespace".to_string(),
            release.namespace.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.helm(args, self.config.command_timeout).await?;

        if !output.success {
            if is_not_found(&output) {
                return Ok(ReleaseStatus::Missing);
            }
            return Err(KubeError::Helm {
                command: "status".to_string(),
                message: output.stderr.trim().to_string(),
            });
        }

        let document: StatusDocument = serde_json::from_str(&output.stdout)?;
        Ok(parse_helm_status(&document.info.status))
    }
}

#[async_trait]
impl<R: CommandRunner> ReleaseDriver for HelmDriver<R> {
    async fn install(
        &self,
        release: &ReleaseRef,
        params: &InstallParameters,
    ) -> shopfleet_core::Result<ReleaseRef> {
        // An unreadable status is never treated as a broken release
        let current = self.query_status(release).await.map_err(|e| {
            StoreError::Dependency(format!("cannot read status of release {} before install: {}", release, e))
        })?;
        match current {
            ReleaseStatus::Deployed => {
                tracing::info!(release = %release, "release already deployed");
                return Ok(release.clone());
            }
            ReleaseStatus::Failed | ReleaseStatus::Pending => {
                tracing::warn!(release = %release, "removing broken release before install");
                self.uninstall_release(release).await?;
            }
            ReleaseStatus::Missing => {}
        }

        let first = match self.run_install(release, params).await {
            Ok(()) => return Ok(release.clone()),
            Err(e) => e,
        };

        tracing::warn!(release = %release, error = %first, "install failed, retrying once");
        if let Err(e) = self.uninstall_release(release).await {
            tracing::warn!(release = %release, error = %e, "cleanup before retry failed");
            return Err(first.into());
        }

        self.run_install(release, params)
            .await
            .map(|()| release.clone())
            .map_err(StoreError::from)
    }

    async fn status(&self, release: &ReleaseRef) -> ReleaseStatus {
        match self.query_status(release).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(release = %release, error = %e, "release status unavailable");
                ReleaseStatus::Pending
            }
        }
    }

    async fn uninstall(&self, release: &ReleaseRef) -> shopfleet_core::Result<()> {
        self.uninstall_release(release).await?;
        self.delete_namespace(&release.namespace).await?;
        Ok(())
    }

    async fn list(&self) -> shopfleet_core::Result<Vec<ReleaseSummary>> {
        let args = vec![
            "list".to_string(),
            "--all-namespaces".to_string(),
            "--all".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.helm(args, self.config.command_timeout).await?;
        if !output.success {
            return Err(KubeError::Helm {
                command: "list".to_string(),
                message: output.stderr.trim().to_string(),
            }
            .into());
        }

        let entries: Vec<ListEntry> = serde_json::from_str(&output.stdout).map_err(KubeError::from)?;
        Ok(entries
            .into_iter()
            .map(|entry| ReleaseSummary {
                status: parse_helm_status(&entry.status),
                release: ReleaseRef {
                    release: entry.name,
                    namespace: entry.namespace,
                },
            })
            .collect())
    }
}
