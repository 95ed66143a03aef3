//! Scripted collaborators for testing
//!
//! Each fake returns queued outcomes in order and falls back to a success
//! default once the queue is empty. Calls are counted for assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    InstallParameters, ProbeOutcome, ProbeTarget, ReadinessProbe, ReleaseDriver, ReleaseStatus,
    ReleaseSummary, ResourceInspector, SetupOutcome, SetupRunner, SetupSpec, StoreResources,
};
use crate::error::{Result, StoreError};
use crate::store::ReleaseRef;

/// Counts of collaborator calls for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub installs: usize,
    pub statuses: usize,
    pub uninstalls: usize,
    pub lists: usize,
}

#[derive(Default)]
struct ReleaseScript {
    installs: VecDeque<Result<()>>,
    statuses: VecDeque<ReleaseStatus>,
    uninstalls: VecDeque<Result<()>>,
    listing: Vec<ReleaseSummary>,
    install_delay: Option<Duration>,
    uninstall_delay: Option<Duration>,
    counts: CallCounts,
    last_params: Option<InstallParameters>,
}

/// Release driver returning scripted results
#[derive(Clone, Default)]
pub struct ScriptedReleaseDriver {
    script: Arc<Mutex<ReleaseScript>>,
}

impl ScriptedReleaseDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `install`
    pub fn push_install(&self, result: Result<()>) -> &Self {
        self.script.lock().unwrap().installs.push_back(result);
        self
    }

    /// Queue the result of the next `status`; `Deployed` once exhausted
    pub fn push_status(&self, status: ReleaseStatus) -> &Self {
        self.script.lock().unwrap().statuses.push_back(status);
        self
    }

    /// Queue the result of the next `uninstall`
    pub fn push_uninstall(&self, result: Result<()>) -> &Self {
        self.script.lock().unwrap().uninstalls.push_back(result);
        self
    }

    /// Make every `install` take this long before answering
    pub fn set_install_delay(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().install_delay = Some(delay);
        self
    }

    /// Make every `uninstall` take this long before answering
    pub fn set_uninstall_delay(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().uninstall_delay = Some(delay);
        self
    }

    /// Releases returned by `list`
    pub fn set_listing(&self, listing: Vec<ReleaseSummary>) -> &Self {
        self.script.lock().unwrap().listing = listing;
        self
    }

    pub fn counts(&self) -> CallCounts {
        self.script.lock().unwrap().counts.clone()
    }

    /// Parameters of the most recent `install`
    pub fn last_params(&self) -> Option<InstallParameters> {
        self.script.lock().unwrap().last_params.clone()
    }
}

#[async_trait]
impl ReleaseDriver for ScriptedReleaseDriver {
    async fn install(&self, release: &ReleaseRef, params: &InstallParameters) -> Result<ReleaseRef> {
        let (result, delay) = {
            let mut script = self.script.lock().unwrap();
            script.counts.installs += 1;
            script.last_params = Some(params.clone());
            (script.installs.pop_front().unwrap_or(Ok(())), script.install_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result.map(|()| release.clone())
    }

    async fn status(&self, _release: &ReleaseRef) -> ReleaseStatus {
        let mut script = self.script.lock().unwrap();
        script.counts.statuses += 1;
        script.statuses.pop_front().unwrap_or(ReleaseStatus::Deployed)
    }

    async fn uninstall(&self, _release: &ReleaseRef) -> Result<()> {
        let (result, delay) = {
            let mut script = self.script.lock().unwrap();
            script.counts.uninstalls += 1;
            (script.uninstalls.pop_front().unwrap_or(Ok(())), script.uninstall_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn list(&self) -> Result<Vec<ReleaseSummary>> {
        let mut script = self.script.lock().unwrap();
        script.counts.lists += 1;
        Ok(script.listing.clone())
    }
}

#[derive(Default)]
struct ProbeScript {
    outcomes: VecDeque<ProbeOutcome>,
    delay: Option<Duration>,
    calls: Vec<ProbeTarget>,
}

/// Readiness prober returning scripted outcomes
#[derive(Clone, Default)]
pub struct ScriptedProber {
    script: Arc<Mutex<ProbeScript>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome; `Healthy` once exhausted
    pub fn push(&self, outcome: ProbeOutcome) -> &Self {
        self.script.lock().unwrap().outcomes.push_back(outcome);
        self
    }

    /// Wait this long (or until cancelled) before answering
    pub fn set_delay(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    pub fn targets(&self) -> Vec<ProbeTarget> {
        self.script.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProber {
    async fn wait_healthy(
        &self,
        target: &ProbeTarget,
        _timeout: Duration,
        _interval: Duration,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let (outcome, delay) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(target.clone());
            (
                script.outcomes.pop_front().unwrap_or(ProbeOutcome::Healthy),
                script.delay,
            )
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        outcome
    }
}

#[derive(Default)]
struct SetupScript {
    outcomes: VecDeque<SetupOutcome>,
    delay: Option<Duration>,
    ignore_cancel: bool,
    specs: Vec<SetupSpec>,
}

/// Setup runner returning scripted outcomes
#[derive(Clone, Default)]
pub struct ScriptedSetupRunner {
    script: Arc<Mutex<SetupScript>>,
}

impl ScriptedSetupRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome; `Succeeded` once exhausted
    pub fn push(&self, outcome: SetupOutcome) -> &Self {
        self.script.lock().unwrap().outcomes.push_back(outcome);
        self
    }

    pub fn set_delay(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    /// Keep running through cancellation until the delay elapses
    pub fn set_ignore_cancel(&self, ignore: bool) -> &Self {
        self.script.lock().unwrap().ignore_cancel = ignore;
        self
    }

    pub fn runs(&self) -> usize {
        self.script.lock().unwrap().specs.len()
    }

    pub fn specs(&self) -> Vec<SetupSpec> {
        self.script.lock().unwrap().specs.clone()
    }
}

#[async_trait]
impl SetupRunner for ScriptedSetupRunner {
    async fn run(&self, spec: &SetupSpec, cancel: &CancellationToken) -> SetupOutcome {
        let (outcome, delay, ignore_cancel) = {
            let mut script = self.script.lock().unwrap();
            script.specs.push(spec.clone());
            (
                script.outcomes.pop_front().unwrap_or(SetupOutcome::Succeeded),
                script.delay,
                script.ignore_cancel,
            )
        };

        if let Some(delay) = delay {
            if ignore_cancel {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return SetupOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        outcome
    }
}

/// Resource inspector returning a fixed answer
#[derive(Clone, Default)]
pub struct StaticInspector {
    resources: Arc<Mutex<Option<StoreResources>>>,
    calls: Arc<Mutex<usize>>,
}

impl StaticInspector {
    /// Inspector that reports `resources` for every store
    pub fn new(resources: StoreResources) -> Self {
        Self {
            resources: Arc::new(Mutex::new(Some(resources))),
            calls: Arc::default(),
        }
    }

    /// Inspector whose every call fails
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ResourceInspector for StaticInspector {
    async fn resources(&self, release: &ReleaseRef) -> Result<StoreResources> {
        *self.calls.lock().unwrap() += 1;
        match self.resources.lock().unwrap().clone() {
            Some(resources) => Ok(StoreResources {
                namespace: release.namespace.clone(),
                ..resources
            }),
            None => Err(StoreError::Dependency("cluster unreachable".to_string())),
        }
    }
}
