//! Shopfleet CLI - provisions isolated e-commerce stores on Kubernetes

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shopfleet::ServerConfig;
use shopfleet::error::ServerError;
use shopfleet::logging::{self, LogFormat};
use shopfleet_core::{Collaborators, FileDriver, Orchestrator, StoreRegistry};
use shopfleet_kube::{HelmDriver, KubeInspector, KubeReadinessProber, KubeSetupRunner};

/// How long shutdown waits for queued lifecycle tasks
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "shopfleet")]
#[command(version)]
#[command(about = "Provision isolated e-commerce stores on Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: <config dir>/shopfleet/config.yaml)
    #[arg(short, long, global = true, env = "SHOPFLEET_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

/// Settings that take precedence over the configuration file
#[derive(Args)]
struct Overrides {
    /// Address the status API listens on
    #[arg(long, global = true, env = "SHOPFLEET_LISTEN")]
    listen: Option<SocketAddr>,

    /// Directory for persisted store records
    #[arg(long, global = true, env = "SHOPFLEET_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Stores are published at <name>.<base-domain>
    #[arg(long, global = true, env = "SHOPFLEET_BASE_DOMAIN")]
    base_domain: Option<String>,

    /// Concurrent lifecycle tasks
    #[arg(long, global = true)]
    workers: Option<usize>,
}

impl Overrides {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(base_domain) = self.base_domain {
            config.orchestrator.base_domain = base_domain;
        }
        if let Some(workers) = self.workers {
            config.orchestrator.workers = workers;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator and its status API
    Serve,

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    logging::init(cli.log_format, cli.debug);

    let config = cli.overrides.apply(ServerConfig::load(cli.config.as_deref())?);
    config.validate()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let settings = config.orchestrator_settings();

    let client = kube::Client::try_default()
        .await
        .map_err(|e| ServerError::Cluster {
            message: e.to_string(),
        })?;

    let releases = HelmDriver::new(config.helm.clone(), client.clone()).into_diagnostic()?;
    let prober = KubeReadinessProber::new(client.clone(), config.probe.check.clone()).into_diagnostic()?;
    let setup = KubeSetupRunner::new(client.clone(), config.setup.clone()).into_diagnostic()?;
    let collaborators = Collaborators {
        releases: Arc::new(releases),
        prober: Arc::new(prober),
        setup: Arc::new(setup),
        inspector: Some(Arc::new(KubeInspector::new(client))),
    };

    let storage = FileDriver::new(config.stores_dir()).into_diagnostic()?;
    let registry = StoreRegistry::open(Arc::new(storage)).await.into_diagnostic()?;
    tracing::info!(
        stores = registry.len(),
        dir = %config.stores_dir().display(),
        "registry loaded"
    );

    let orchestrator = Orchestrator::new(registry, collaborators, settings).into_diagnostic()?;

    let recovery = orchestrator.recover().await.into_diagnostic()?;
    if !recovery.failed.is_empty() || !recovery.retried.is_empty() || !recovery.deletions.is_empty() {
        tracing::info!(
            failed = recovery.failed.len(),
            retried = recovery.retried.len(),
            deletions = recovery.deletions.len(),
            "recovered interrupted stores"
        );
    }

    if orchestrator.settings().adopt_existing_releases {
        match orchestrator.adopt().await {
            Ok(adopted) => tracing::info!(count = adopted.len(), "adoption finished"),
            Err(e) => tracing::warn!(error = %e, "failed to list existing releases"),
        }
    }

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .into_diagnostic()?;

    shopfleet::serve(listener, orchestrator.clone(), shutdown_signal())
        .await
        .into_diagnostic()?;

    tracing::info!("draining lifecycle tasks");
    orchestrator.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
