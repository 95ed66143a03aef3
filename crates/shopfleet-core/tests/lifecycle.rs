//! End-to-end lifecycle tests against scripted collaborators

use std::sync::Arc;
use std::time::Duration;

use shopfleet_core::driver::mock::{
    ScriptedProber, ScriptedReleaseDriver, ScriptedSetupRunner, StaticInspector,
};
use shopfleet_core::{
    Collaborators, FileDriver, MemoryDriver, Orchestrator, OrchestratorSettings, ProbeOutcome,
    ReleaseRef, ReleaseStatus, ReleaseSummary, RestartPolicy, SetupOutcome, StoreCredentials,
    StoreError, StoreKind, StoreName, StoreRecord, StoreRegistry, StoreResources, StoreStatus,
};

const SETTLE: Duration = Duration::from_secs(5);

struct Harness {
    orchestrator: Orchestrator,
    releases: ScriptedReleaseDriver,
    prober: ScriptedProber,
    setup: ScriptedSetupRunner,
    storage: MemoryDriver,
}

fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        base_domain: "example.com".to_string(),
        probe_timeout: Duration::from_secs(2),
        probe_interval: Duration::from_millis(10),
        setup_timeout: Duration::from_secs(2),
        cancel_grace: Duration::from_millis(300),
        ..Default::default()
    }
}

async fn harness_with(storage: MemoryDriver, settings: OrchestratorSettings) -> Harness {
    let releases = ScriptedReleaseDriver::new();
    let prober = ScriptedProber::new();
    let setup = ScriptedSetupRunner::new();

    let registry = StoreRegistry::open(Arc::new(storage.clone())).await.unwrap();
    let collaborators = Collaborators {
        releases: Arc::new(releases.clone()),
        prober: Arc::new(prober.clone()),
        setup: Arc::new(setup.clone()),
        inspector: None,
    };
    let orchestrator = Orchestrator::new(registry, collaborators, settings).unwrap();

    Harness {
        orchestrator,
        releases,
        prober,
        setup,
        storage,
    }
}

async fn harness() -> Harness {
    harness_with(MemoryDriver::new(), test_settings()).await
}

impl Harness {
    async fn settle(&self, name: &str) {
        assert!(
            self.orchestrator.wait_idle(name, SETTLE).await,
            "store '{}' still busy",
            name
        );
    }

    async fn create_and_settle(&self, name: &str) -> StoreRecord {
        self.orchestrator.create(name, "woocommerce").await.unwrap();
        self.settle(name).await;
        self.orchestrator.get(name).unwrap()
    }

    async fn wait_for(&self, name: &str, check: impl Fn(&StoreRecord) -> bool) {
        let deadline = tokio::time::Instant::now() + SETTLE;
        loop {
            if let Ok(record) = self.orchestrator.get(name)
                && check(&record)
            {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "condition never met for '{}'", name);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn interrupted(name: &str, status: StoreStatus) -> StoreRecord {
    let mut record = StoreRecord::requested(
        StoreName::parse(name).unwrap(),
        StoreKind::WooCommerce,
        StoreCredentials::generate("admin@example.com"),
    );
    match status {
        StoreStatus::Requested => {}
        StoreStatus::Provisioning => record.mark_provisioning().unwrap(),
        StoreStatus::Deleting => {
            record.mark_provisioning().unwrap();
            record.mark_ready("https://x.example.com".into()).unwrap();
            record.mark_deleting().unwrap();
        }
        other => panic!("unexpected status {}", other),
    }
    record
}

#[tokio::test]
async fn fashion_shop_becomes_ready() {
    let h = harness().await;

    let accepted = h.orchestrator.create("fashion-shop", "woocommerce").await.unwrap();
    assert_eq!(accepted.status, StoreStatus::Requested);
    assert!(accepted.url.is_none());

    h.settle("fashion-shop").await;
    let record = h.orchestrator.get("fashion-shop").unwrap();
    assert_eq!(record.status, StoreStatus::Ready);
    assert_eq!(record.url.as_deref(), Some("https://fashion-shop.example.com"));
    assert!(record.error_message.is_none());
    assert_eq!(record.id, accepted.id);

    let counts = h.releases.counts();
    assert_eq!(counts.installs, 1);
    assert_eq!(counts.statuses, 1);
    assert_eq!(h.prober.calls(), 1);
    assert_eq!(h.setup.runs(), 1);

    let spec = &h.setup.specs()[0];
    assert_eq!(spec.job_name(), "woo-fashion-shop-setup-1");
    assert_eq!(spec.url, "https://fashion-shop.example.com");

    let params = h.releases.last_params().unwrap();
    assert_eq!(params.ingress_host, "fashion-shop.example.com");
    assert_eq!(params.credentials, spec.credentials);

    let stored = h.storage.stored("fashion-shop").unwrap();
    assert_eq!(stored.status, StoreStatus::Ready);
}

#[tokio::test]
async fn name_is_normalized() {
    let h = harness().await;
    let record = h.orchestrator.create("Fashion Shop", "WooCommerce").await.unwrap();
    assert_eq!(record.name.as_str(), "fashion-shop");
    assert_eq!(record.release_ref.namespace, "store-fashion-shop");
    h.settle("fashion_shop").await;
    assert!(h.orchestrator.get("FASHION_SHOP").is_ok());
}

#[tokio::test]
async fn bad_name_is_rejected_without_record() {
    let h = harness().await;
    let err = h.orchestrator.create("bad name!", "woocommerce").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    let err = h.orchestrator.create("shop", "magento").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    assert!(h.orchestrator.list().is_empty());
    assert_eq!(h.storage.record_count(), 0);
    assert_eq!(h.releases.counts().installs, 0);
}

#[tokio::test]
async fn second_create_conflicts() {
    let h = harness().await;
    h.prober.set_delay(Duration::from_millis(300));

    h.orchestrator.create("shop", "woocommerce").await.unwrap();
    let err = h.orchestrator.create("shop", "woocommerce").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(h.orchestrator.list().len(), 1);

    h.settle("shop").await;
    let err = h.orchestrator.create("shop", "woocommerce").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(h.releases.counts().installs, 1);
}

#[tokio::test]
async fn install_failure_stops_workflow() {
    let h = harness().await;
    h.releases
        .push_install(Err(StoreError::Dependency("chart not found".into())));

    let record = h.create_and_settle("shop").await;
    assert_eq!(record.status, StoreStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("release install failed: chart not found")
    );
    assert!(record.url.is_none());
    assert_eq!(h.prober.calls(), 0);
    assert_eq!(h.setup.runs(), 0);
    assert_eq!(h.releases.counts().uninstalls, 0);
}

#[tokio::test]
async fn readiness_timeout_skips_setup() {
    let h = harness().await;
    h.prober.push(ProbeOutcome::TimedOut {
        last_observation: "deployment woo-shop-wordpress: 0/1 ready".into(),
    });

    let record = h.create_and_settle("shop").await;
    assert_eq!(record.status, StoreStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.starts_with("workload did not become healthy within 2s"));
    assert!(message.contains("0/1 ready"));

    assert_eq!(h.setup.runs(), 0);
    assert_eq!(h.releases.counts().statuses, 0);
    // The release is left in place for inspection
    assert_eq!(h.releases.counts().uninstalls, 0);
}

#[tokio::test]
async fn setup_outcomes_are_reported() {
    let cases = [
        (
            SetupOutcome::Failed("BackoffLimitExceeded: wp-cli exited 1".into()),
            "setup job failed: BackoffLimitExceeded: wp-cli exited 1",
        ),
        (SetupOutcome::TimedOut, "setup job timed out after 2s"),
        (
            SetupOutcome::Unknown("job disappeared".into()),
            "setup job outcome unknown: job disappeared",
        ),
    ];

    for (outcome, expected) in cases {
        let h = harness().await;
        h.setup.push(outcome);

        let record = h.create_and_settle("shop").await;
        assert_eq!(record.status, StoreStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some(expected));
        assert_eq!(h.releases.counts().statuses, 0);
    }
}

#[tokio::test]
async fn unstable_release_fails() {
    let h = harness().await;
    h.releases.push_status(ReleaseStatus::Pending);

    let record = h.create_and_settle("shop").await;
    assert_eq!(record.status, StoreStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("release did not stabilize (status: pending)")
    );
}

#[tokio::test]
async fn uninstall_on_failure_cleans_up() {
    let settings = OrchestratorSettings {
        uninstall_on_failure: true,
        ..test_settings()
    };
    let h = harness_with(MemoryDriver::new(), settings).await;
    h.setup.push(SetupOutcome::Failed("boom".into()));

    let record = h.create_and_settle("shop").await;
    assert_eq!(record.status, StoreStatus::Failed);
    assert_eq!(h.releases.counts().uninstalls, 1);
}

#[tokio::test]
async fn recreate_after_failure_uses_new_setup_job() {
    let h = harness().await;
    h.setup.push(SetupOutcome::Failed("plugin install failed".into()));

    let failed = h.create_and_settle("shop").await;
    assert_eq!(failed.status, StoreStatus::Failed);
    assert_eq!(failed.attempt, 1);

    let ready = h.create_and_settle("shop").await;
    assert_eq!(ready.status, StoreStatus::Ready);
    assert_eq!(ready.attempt, 2);

    let jobs: Vec<String> = h.setup.specs().iter().map(|spec| spec.job_name()).collect();
    assert_eq!(jobs, vec!["woo-shop-setup-1", "woo-shop-setup-2"]);
}

#[tokio::test]
async fn create_over_failed_is_fresh() {
    let h = harness().await;
    h.releases
        .push_install(Err(StoreError::Dependency("quota exceeded".into())));

    let failed = h.create_and_settle("alpha").await;
    assert_eq!(failed.status, StoreStatus::Failed);
    h.create_and_settle("bravo").await;

    let fresh = h.orchestrator.create("alpha", "woocommerce").await.unwrap();
    assert_ne!(fresh.id, failed.id);
    assert_ne!(fresh.credentials, failed.credentials);
    assert!(fresh.created_at >= failed.created_at);
    assert!(fresh.error_message.is_none());

    h.settle("alpha").await;
    let names: Vec<_> = h
        .orchestrator
        .list()
        .into_iter()
        .map(|r| r.name.to_string())
        .collect();
    assert_eq!(names, vec!["bravo", "alpha"]);
    assert_eq!(h.orchestrator.get("alpha").unwrap().status, StoreStatus::Ready);
}

#[tokio::test]
async fn delete_ready_store_removes_it() {
    let h = harness().await;
    h.create_and_settle("shop").await;

    let deleting = h.orchestrator.delete("shop").await.unwrap();
    assert_eq!(deleting.status, StoreStatus::Deleting);
    assert!(deleting.url.is_none());

    h.settle("shop").await;
    assert!(matches!(h.orchestrator.get("shop"), Err(StoreError::NotFound(_))));
    assert_eq!(h.storage.record_count(), 0);
    assert_eq!(h.releases.counts().uninstalls, 1);
}

#[tokio::test]
async fn failed_uninstall_keeps_record() {
    let h = harness().await;
    h.create_and_settle("shop").await;
    h.releases
        .push_uninstall(Err(StoreError::Dependency("helm unreachable".into())));

    h.orchestrator.delete("shop").await.unwrap();
    h.settle("shop").await;

    let record = h.orchestrator.get("shop").unwrap();
    assert_eq!(record.status, StoreStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("deletion failed: helm unreachable")
    );

    // A failed deletion can be retried
    h.orchestrator.delete("shop").await.unwrap();
    h.settle("shop").await;
    assert!(h.orchestrator.get("shop").is_err());
}

#[tokio::test]
async fn delete_unknown_and_repeated() {
    let h = harness().await;
    assert!(matches!(h.orchestrator.delete("ghost").await, Err(StoreError::NotFound(_))));
    assert!(matches!(h.orchestrator.delete("bad name!").await, Err(StoreError::NotFound(_))));

    h.create_and_settle("shop").await;
    h.releases.set_uninstall_delay(Duration::from_millis(300));
    h.orchestrator.delete("shop").await.unwrap();

    let err = h.orchestrator.delete("shop").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    let err = h.orchestrator.create("shop", "woocommerce").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    h.settle("shop").await;
    assert_eq!(h.releases.counts().uninstalls, 1);
}

#[tokio::test]
async fn delete_cancels_provisioning() {
    let h = harness().await;
    h.prober.set_delay(Duration::from_secs(30));

    h.orchestrator.create("shop", "woocommerce").await.unwrap();
    h.wait_for("shop", |r| r.status == StoreStatus::Provisioning).await;
    while h.prober.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let deleting = h.orchestrator.delete("shop").await.unwrap();
    assert_eq!(deleting.status, StoreStatus::Deleting);

    h.settle("shop").await;
    assert!(matches!(h.orchestrator.get("shop"), Err(StoreError::NotFound(_))));
    assert_eq!(h.setup.runs(), 0);
    assert_eq!(h.releases.counts().uninstalls, 1);
}

#[tokio::test]
async fn delete_cancels_slow_install() {
    let h = harness().await;
    h.releases.set_install_delay(Duration::from_secs(30));

    h.orchestrator.create("shop", "woocommerce").await.unwrap();
    h.wait_for("shop", |r| r.status == StoreStatus::Provisioning).await;

    h.orchestrator.delete("shop").await.unwrap();
    h.settle("shop").await;
    assert!(h.orchestrator.get("shop").is_err());
    assert_eq!(h.prober.calls(), 0);
}

#[tokio::test]
async fn delete_conflicts_when_task_ignores_cancel() {
    let h = harness().await;
    h.setup
        .set_delay(Duration::from_millis(800))
        .set_ignore_cancel(true);

    h.orchestrator.create("shop", "woocommerce").await.unwrap();
    while h.setup.runs() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = h.orchestrator.delete("shop").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // The cancelled task finishes without touching the record
    h.settle("shop").await;
    let record = h.orchestrator.get("shop").unwrap();
    assert_eq!(record.status, StoreStatus::Provisioning);
    assert_eq!(h.releases.counts().statuses, 0);

    h.orchestrator.delete("shop").await.unwrap();
    h.settle("shop").await;
    assert!(h.orchestrator.get("shop").is_err());
}

#[tokio::test]
async fn reads_are_idempotent() {
    let h = harness().await;
    h.create_and_settle("one").await;
    h.create_and_settle("two").await;

    assert_eq!(h.orchestrator.list(), h.orchestrator.list());
    assert_eq!(h.orchestrator.get("one").unwrap(), h.orchestrator.get("one").unwrap());
}

#[tokio::test]
async fn restart_fails_interrupted_stores() {
    let storage = MemoryDriver::with_records(vec![
        interrupted("frozen", StoreStatus::Provisioning),
        interrupted("queued", StoreStatus::Requested),
    ]);
    let h = harness_with(storage, test_settings()).await;

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.failed.len(), 2);

    for name in ["frozen", "queued"] {
        let record = h.orchestrator.get(name).unwrap();
        assert_eq!(record.status, StoreStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("interrupted by restart"));
        assert_eq!(h.storage.stored(name).unwrap().status, StoreStatus::Failed);
    }
    assert_eq!(h.releases.counts().installs, 0);
}

#[tokio::test]
async fn restart_retries_interrupted_stores() {
    let settings = OrchestratorSettings {
        restart_policy: RestartPolicy::Retry,
        ..test_settings()
    };
    let original = interrupted("frozen", StoreStatus::Provisioning);
    let storage = MemoryDriver::with_records(vec![original.clone()]);
    let h = harness_with(storage, settings).await;

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.retried.len(), 1);

    h.settle("frozen").await;
    let record = h.orchestrator.get("frozen").unwrap();
    assert_eq!(record.status, StoreStatus::Ready);
    assert_eq!(record.attempt, 2);
    assert_eq!(record.id, original.id);
    assert_eq!(record.credentials, original.credentials);
    assert_eq!(h.setup.specs()[0].job_name(), "woo-frozen-setup-2");
}

#[tokio::test]
async fn restart_resumes_deletion() {
    let storage = MemoryDriver::with_records(vec![interrupted("going", StoreStatus::Deleting)]);
    let h = harness_with(storage, test_settings()).await;

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.deletions.len(), 1);

    h.settle("going").await;
    assert!(h.orchestrator.get("going").is_err());
    assert_eq!(h.releases.counts().uninstalls, 1);
}

#[tokio::test]
async fn adopts_deployed_releases() {
    let h = harness().await;
    h.create_and_settle("known").await;

    let summary = |release: &str, namespace: &str, status| ReleaseSummary {
        release: ReleaseRef {
            release: release.into(),
            namespace: namespace.into(),
        },
        status,
    };
    h.releases.set_listing(vec![
        summary("woo-known", "store-known", ReleaseStatus::Deployed),
        summary("woo-legacy", "store-legacy", ReleaseStatus::Deployed),
        summary("woo-broken", "store-broken", ReleaseStatus::Failed),
        summary("ingress-nginx", "ingress-nginx", ReleaseStatus::Deployed),
    ]);

    let adopted = h.orchestrator.adopt().await.unwrap();
    assert_eq!(adopted, vec![StoreName::parse("legacy").unwrap()]);

    let record = h.orchestrator.get("legacy").unwrap();
    assert_eq!(record.status, StoreStatus::Ready);
    assert_eq!(record.url.as_deref(), Some("https://legacy.example.com"));
    assert!(record.credentials.is_none());
    assert_eq!(h.orchestrator.list().len(), 2);

    // Adoption is idempotent
    assert!(h.orchestrator.adopt().await.unwrap().is_empty());
}

#[tokio::test]
async fn report_includes_resources_for_live_stores() {
    let storage = MemoryDriver::new();
    let releases = ScriptedReleaseDriver::new();
    let inspector = StaticInspector::new(StoreResources {
        deployments: vec!["woo-shop-wordpress".into()],
        pvcs: vec!["data-woo-shop-mariadb-0".into()],
        ..Default::default()
    });
    let collaborators = Collaborators {
        releases: Arc::new(releases.clone()),
        prober: Arc::new(ScriptedProber::new()),
        setup: Arc::new(ScriptedSetupRunner::new()),
        inspector: Some(Arc::new(inspector.clone())),
    };
    let registry = StoreRegistry::open(Arc::new(storage)).await.unwrap();
    let orchestrator = Orchestrator::new(registry, collaborators, test_settings()).unwrap();

    orchestrator.create("shop", "woocommerce").await.unwrap();
    assert!(orchestrator.wait_idle("shop", SETTLE).await);

    let report = orchestrator.report("shop").await.unwrap();
    let resources = report.resources.unwrap();
    assert_eq!(resources.namespace, "store-shop");
    assert_eq!(resources.deployments, vec!["woo-shop-wordpress"]);

    releases.push_install(Err(StoreError::Dependency("boom".into())));
    orchestrator.create("broken", "woocommerce").await.unwrap();
    assert!(orchestrator.wait_idle("broken", SETTLE).await);
    let report = orchestrator.report("broken").await.unwrap();
    assert!(report.resources.is_none());
    assert_eq!(inspector.calls(), 1);
}

#[tokio::test]
async fn file_registry_survives_restart() {
    let tmp = tempfile::TempDir::new().unwrap();
    let stores = tmp.path().join("stores");

    {
        let registry = StoreRegistry::open(Arc::new(FileDriver::new(stores.clone()).unwrap()))
            .await
            .unwrap();
        let collaborators = Collaborators {
            releases: Arc::new(ScriptedReleaseDriver::new()),
            prober: Arc::new(ScriptedProber::new()),
            setup: Arc::new(ScriptedSetupRunner::new()),
            inspector: None,
        };
        let orchestrator = Orchestrator::new(registry, collaborators, test_settings()).unwrap();
        orchestrator.create("durable", "woocommerce").await.unwrap();
        assert!(orchestrator.wait_idle("durable", SETTLE).await);
        orchestrator.shutdown(Duration::from_secs(1)).await;
    }

    let registry = StoreRegistry::open(Arc::new(FileDriver::new(stores).unwrap()))
        .await
        .unwrap();
    let record = registry.get(&StoreName::parse("durable").unwrap()).unwrap();
    assert_eq!(record.status, StoreStatus::Ready);
    assert!(record.credentials.is_some());
}
