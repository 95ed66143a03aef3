//! Shopfleet Kube - Kubernetes integration for Shopfleet
//!
//! This crate implements the collaborator traits of `shopfleet-core`
//! against a real cluster:
//! - **Release Driver**: Installs and removes store releases through the helm CLI
//! - **Readiness Prober**: Polls Deployments/StatefulSets and the storefront URL
//! - **Setup Runner**: Launches one setup Job per attempt and watches it
//! - **Resource Inspector**: Lists the objects in a store namespace

pub mod command;
pub mod error;
pub mod health;
pub mod helm;
pub mod resources;
pub mod setup;

pub use command::{CommandOutput, CommandRunner, ProcessRunner};
pub use error::{KubeError, Result};
pub use health::{
    KubeReadinessProber, KubeWorkloads, ProbeConfig, WorkloadHealth, WorkloadSource,
    deployment_health, statefulset_health,
};
pub use helm::{HelmConfig, HelmDriver, parse_helm_status, set_values};
pub use resources::{KubeInspector, NAMESPACE_NOT_FOUND};
pub use setup::{
    CreateOutcome, JobClient, JobPhase, KubeJobs, KubeSetupRunner, SetupConfig, build_job,
    classify_job,
};
