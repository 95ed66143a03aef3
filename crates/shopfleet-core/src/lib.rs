//! Shopfleet Core - Store lifecycle orchestration
//!
//! This crate provides the cluster-independent half of Shopfleet:
//! - `StoreRecord`: The durable record of one store and its state machine
//! - `StoreRegistry`: Name-keyed registry over a pluggable storage driver
//! - `Orchestrator`: Create/delete workflows run on a bounded worker pool
//! - `driver`: Traits for the release tool, readiness prober, setup runner
//!   and resource inspector, with scripted fakes in `driver::mock`

pub mod credentials;
pub mod driver;
pub mod error;
pub mod lease;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod settings;
pub mod store;

pub use credentials::{StoreCredentials, generate_secret};
pub use driver::{
    InstallParameters, ProbeOutcome, ProbeTarget, ReadinessProbe, ReleaseDriver, ReleaseStatus,
    ReleaseSummary, ResourceInspector, SetupOutcome, SetupRunner, SetupSpec, StoreResources,
};
pub use error::{ErrorKind, Result, StoreError};
pub use lease::{Lease, LeaseTable, OperationKind};
pub use orchestrator::{Collaborators, Orchestrator, RecoveryReport, StoreReport};
pub use pool::WorkerPool;
pub use registry::{FileDriver, MemoryDriver, RegistryStorage, StoreRegistry};
pub use settings::{OrchestratorSettings, RestartPolicy};
pub use store::{ReleaseRef, StoreKind, StoreName, StoreRecord, StoreStatus};
