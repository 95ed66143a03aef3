//! Orchestrator settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credentials::{DEFAULT_ADMIN_USER, StoreCredentials};
use crate::driver::InstallParameters;
use crate::error::{Result, StoreError};
use crate::pool::DEFAULT_WORKERS;
use crate::store::StoreName;

/// What to do with stores found mid-provisioning at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Mark them `Failed` with "interrupted by restart"
    #[default]
    Fail,
    /// Provision them again
    Retry,
}

/// Tunables of the lifecycle orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Stores are published at `<name>.<baseDomain>`
    pub base_domain: String,

    pub url_scheme: String,

    /// Concurrent lifecycle tasks
    pub workers: usize,

    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Path appended to the store URL for the HTTP readiness check
    pub probe_http_path: Option<String>,

    #[serde(with = "humantime_serde")]
    pub setup_timeout: Duration,

    /// How long a delete waits for an in-flight provision to stop
    #[serde(with = "humantime_serde")]
    pub cancel_grace: Duration,

    pub restart_policy: RestartPolicy,

    /// Uninstall the partial release when provisioning fails
    pub uninstall_on_failure: bool,

    /// Create records for deployed releases that have none
    pub adopt_existing_releases: bool,

    pub admin_user: String,

    pub admin_email: String,

    /// Site title; the store name when unset
    pub site_title: Option<String>,

    pub persistence_size: String,

    pub storage_class: Option<String>,

    pub cpu_limit: String,

    pub memory_limit: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            base_domain: "local".to_string(),
            url_scheme: "https".to_string(),
            workers: DEFAULT_WORKERS,
            probe_timeout: Duration::from_secs(180),
            probe_interval: Duration::from_secs(5),
            probe_http_path: None,
            setup_timeout: Duration::from_secs(600),
            cancel_grace: Duration::from_secs(10),
            restart_policy: RestartPolicy::Fail,
            uninstall_on_failure: false,
            adopt_existing_releases: false,
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            admin_email: "admin@example.com".to_string(),
            site_title: None,
            persistence_size: "5Gi".to_string(),
            storage_class: None,
            cpu_limit: "1".to_string(),
            memory_limit: "1Gi".to_string(),
        }
    }
}

impl OrchestratorSettings {
    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StoreError::invalid("workers must be at least 1"));
        }
        if self.base_domain.trim_matches('.').trim().is_empty() {
            return Err(StoreError::invalid("baseDomain must not be empty"));
        }
        if !matches!(self.url_scheme.as_str(), "http" | "https") {
            return Err(StoreError::invalid(format!(
                "urlScheme must be 'http' or 'https', got '{}'",
                self.url_scheme
            )));
        }
        if self.probe_interval.is_zero() || self.probe_interval >= self.probe_timeout {
            return Err(StoreError::invalid(format!(
                "probeInterval ({:?}) must be non-zero and shorter than probeTimeout ({:?})",
                self.probe_interval, self.probe_timeout
            )));
        }
        if self.setup_timeout.is_zero() {
            return Err(StoreError::invalid("setupTimeout must be non-zero"));
        }
        if self.admin_email.trim().is_empty() {
            return Err(StoreError::invalid("adminEmail must not be empty"));
        }
        Ok(())
    }

    /// Public URL of a store
    pub fn store_url(&self, name: &StoreName) -> String {
        name.url(&self.url_scheme, &self.base_domain)
    }

    /// URL the readiness prober checks, if an HTTP check is configured
    pub fn probe_url(&self, name: &StoreName) -> Option<String> {
        self.probe_http_path.as_ref().map(|path| {
            format!(
                "{}/{}",
                self.store_url(name),
                path.trim_start_matches('/')
            )
        })
    }

    /// Fresh credentials for a new store
    pub fn generate_credentials(&self) -> StoreCredentials {
        StoreCredentials::generate_for(&self.admin_user, &self.admin_email)
    }

    /// Release values for one store
    pub fn install_parameters(
        &self,
        name: &StoreName,
        credentials: StoreCredentials,
    ) -> InstallParameters {
        InstallParameters {
            credentials,
            site_title: self
                .site_title
                .clone()
                .unwrap_or_else(|| name.to_string()),
            ingress_host: name.host(&self.base_domain),
            persistence_size: self.persistence_size.clone(),
            storage_class: self.storage_class.clone(),
            cpu_limit: self.cpu_limit.clone(),
            memory_limit: self.memory_limit.clone(),
        }
    }
}
