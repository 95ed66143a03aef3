//! Server configuration
//!
//! Loaded from YAML (camelCase keys, every field optional):
//!
//! ```yaml
//! listen: 0.0.0.0:8080
//! dataDir: /var/lib/shopfleet
//! orchestrator:
//!   baseDomain: shops.example.com
//!   workers: 4
//!   probeTimeout: 3m
//!   restartPolicy: retry
//! helm:
//!   chart: oci://registry-1.docker.io/bitnamicharts/wordpress
//!   installTimeout: 15m
//! probe:
//!   httpPath: /wp-login.php
//! setup:
//!   image: wordpress:cli
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use shopfleet_core::OrchestratorSettings;
use shopfleet_kube::{HelmConfig, ProbeConfig, SetupConfig};

use crate::error::ServerError;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Readiness probe section
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeSection {
    /// Path on the store URL that must answer before the store is ready
    pub http_path: Option<String>,

    #[serde(flatten)]
    pub check: ProbeConfig,
}

/// Everything the `serve` command needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub listen: SocketAddr,

    /// Root of persisted state; store records live in `<dataDir>/stores`
    pub data_dir: PathBuf,

    pub orchestrator: OrchestratorSettings,

    pub helm: HelmConfig,

    pub probe: ProbeSection,

    pub setup: SetupConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: default_data_dir(),
            orchestrator: OrchestratorSettings::default(),
            helm: HelmConfig::default(),
            probe: ProbeSection::default(),
            setup: SetupConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopfleet")
}

impl ServerConfig {
    /// `<config dir>/shopfleet/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shopfleet").join("config.yaml"))
    }

    /// Load an explicit file, else the default file if present, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ServerError> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::ConfigIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| ServerError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid, all-default configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn to_yaml(&self) -> Result<String, ServerError> {
        serde_yaml::to_string(self).map_err(|e| ServerError::invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        self.orchestrator_settings()
            .validate()
            .map_err(|e| ServerError::invalid(e.detail()))?;
        self.helm
            .validate()
            .map_err(|e| ServerError::invalid(e.to_string()))?;
        self.setup
            .validate()
            .map_err(|e| ServerError::invalid(e.to_string()))?;
        if self.probe.check.http_timeout.is_zero() {
            return Err(ServerError::invalid("probe httpTimeout must be non-zero"));
        }
        Ok(())
    }

    /// Orchestrator settings with the probe path folded in
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let mut settings = self.orchestrator.clone();
        if self.probe.http_path.is_some() {
            settings.probe_http_path = self.probe.http_path.clone();
        }
        settings
    }

    /// Directory of the file registry
    pub fn stores_dir(&self) -> PathBuf {
        self.data_dir.join("stores")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfleet_core::RestartPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.orchestrator.workers, 4);
        assert_eq!(config.probe.check.expected_status, 200);
        assert!(config.stores_dir().ends_with("shopfleet/stores"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = ServerConfig::parse(
            r#"
listen: 127.0.0.1:9000
dataDir: /srv/shopfleet
orchestrator:
  baseDomain: shops.example.com
  probeTimeout: 4m
  restartPolicy: retry
helm:
  installTimeout: 20m
probe:
  httpPath: /wp-login.php
  expectedStatus: 302
setup:
  pollInterval: 2s
"#,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.stores_dir(), PathBuf::from("/srv/shopfleet/stores"));
        assert_eq!(config.orchestrator.base_domain, "shops.example.com");
        assert_eq!(config.orchestrator.probe_timeout, Duration::from_secs(240));
        assert_eq!(config.orchestrator.restart_policy, RestartPolicy::Retry);
        assert_eq!(config.orchestrator.workers, 4);
        assert_eq!(config.helm.install_timeout, Duration::from_secs(1200));
        assert_eq!(config.helm.binary, "helm");
        assert_eq!(config.probe.check.expected_status, 302);
        assert_eq!(config.setup.poll_interval, Duration::from_secs(2));
        assert_eq!(
            config.orchestrator_settings().probe_http_path.as_deref(),
            Some("/wp-login.php")
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(ServerConfig::parse("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_unknown_duration_format_rejected() {
        assert!(ServerConfig::parse("orchestrator:\n  probeTimeout: soon\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.orchestrator.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ServerError::InvalidConfig { .. })
        ));

        let mut config = ServerConfig::default();
        config.orchestrator.probe_interval = config.orchestrator.probe_timeout;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.helm.chart = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "orchestrator:\n  baseDomain: example.org\n").unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.base_domain, "example.org");

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            ServerConfig::load(Some(&missing)),
            Err(ServerError::ConfigIo { .. })
        ));

        std::fs::write(&path, "workers: [").unwrap();
        assert!(matches!(
            ServerConfig::load(Some(&path)),
            Err(ServerError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_yaml_roundtrip_keeps_effective_values() {
        let mut config = ServerConfig::default();
        config.orchestrator.base_domain = "example.net".into();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("baseDomain: example.net"));
        assert_eq!(ServerConfig::parse(&yaml).unwrap(), config);
    }
}
