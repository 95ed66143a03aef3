//! HTTP tests for the status API against scripted collaborators

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use shopfleet::{DeleteResponse, StatusView, StoreView};
use shopfleet_core::driver::mock::{
    ScriptedProber, ScriptedReleaseDriver, ScriptedSetupRunner, StaticInspector,
};
use shopfleet_core::{
    Collaborators, MemoryDriver, Orchestrator, OrchestratorSettings, ProbeOutcome,
    StoreRegistry, StoreResources,
};

struct TestServer {
    base: String,
    http: reqwest::Client,
    prober: ScriptedProber,
    setup: ScriptedSetupRunner,
    _stop: oneshot::Sender<()>,
}

async fn start() -> TestServer {
    let prober = ScriptedProber::new();
    let setup = ScriptedSetupRunner::new();
    let inspector = StaticInspector::new(StoreResources {
        deployments: vec!["woo-shop-wordpress".into()],
        services: vec!["woo-shop-wordpress".into(), "woo-shop-mariadb".into()],
        ..Default::default()
    });

    let registry = StoreRegistry::open(Arc::new(MemoryDriver::new()))
        .await
        .unwrap();
    let collaborators = Collaborators {
        releases: Arc::new(ScriptedReleaseDriver::new()),
        prober: Arc::new(prober.clone()),
        setup: Arc::new(setup.clone()),
        inspector: Some(Arc::new(inspector)),
    };
    let settings = OrchestratorSettings {
        base_domain: "example.com".into(),
        probe_timeout: Duration::from_secs(2),
        probe_interval: Duration::from_millis(10),
        setup_timeout: Duration::from_secs(2),
        cancel_grace: Duration::from_millis(200),
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(registry, collaborators, settings).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async {
            let _ = stopped.await;
        };
        shopfleet::serve(listener, orchestrator, shutdown).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        http: reqwest::Client::new(),
        prober,
        setup,
        _stop: stop,
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn create(&self, body: Value) -> reqwest::Response {
        self.http
            .post(self.url("/api/stores"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn store(&self, name: &str) -> reqwest::Response {
        self.http
            .get(self.url(&format!("/api/stores/{}", name)))
            .send()
            .await
            .unwrap()
    }

    async fn wait_status(&self, name: &str, status: &str) -> StoreView {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.store(name).await;
            if response.status() == StatusCode::OK {
                let view: StoreView = response.json().await.unwrap();
                if view.status == status {
                    return view;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "store '{}' never reached {}",
                name,
                status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_gone(&self, name: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.store(name).await.status() != StatusCode::NOT_FOUND {
            assert!(tokio::time::Instant::now() < deadline, "store '{}' never removed", name);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn error_of(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_health() {
    let server = start().await;
    let body: Value = server
        .http
        .get(server.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_returns_accepted_then_ready() {
    let server = start().await;

    let response = server
        .create(json!({"name": "Fashion Shop", "type": "woocommerce"}))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: StoreView = response.json().await.unwrap();
    assert_eq!(accepted.name, "fashion-shop");
    assert_eq!(accepted.kind, "woocommerce");
    assert!(accepted.url.is_none());

    let ready = server.wait_status("fashion-shop", "ready").await;
    assert_eq!(ready.id, accepted.id);
    assert_eq!(ready.url.as_deref(), Some("https://fashion-shop.example.com"));
    assert_eq!(ready.namespace, "store-fashion-shop");
    assert!(ready.error.is_none());
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let server = start().await;

    let response = server.create(json!({"name": "bad name!", "type": "woocommerce"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_of(response).await.contains("bad-name!"));

    let response = server.create(json!({"type": "woocommerce"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(response).await, "Store name is required");

    let response = server.create(json!({"name": "shop"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(response).await, "Store type is required");

    let response = server.create(json!({"name": "shop", "type": "magento"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .http
        .post(server.url("/api/stores"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stores: Vec<StoreView> = server
        .http
        .get(server.url("/api/stores"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stores.is_empty());
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let server = start().await;
    server.setup.set_delay(Duration::from_millis(300));

    let first = server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = server.create(json!({"name": "SHOP", "type": "woocommerce"})).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    server.wait_status("shop", "ready").await;
    let third = server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    assert_eq!(third.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_in_creation_order() {
    let server = start().await;
    for name in ["zeta", "alpha", "mid"] {
        let response = server.create(json!({"name": name, "type": "woocommerce"})).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let stores: Vec<StoreView> = server
        .http
        .get(server.url("/api/stores"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = stores.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn test_unknown_store_is_not_found() {
    let server = start().await;

    let response = server.store("ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(response).await, "store 'ghost' not found");

    let response = server
        .http
        .delete(server.url("/api/stores/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .http
        .get(server.url("/api/stores/ghost/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_store_reports_error() {
    let server = start().await;
    server.prober.push(ProbeOutcome::TimedOut {
        last_observation: "0/1 ready".into(),
    });

    server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    let failed = server.wait_status("shop", "failed").await;
    let error = failed.error.unwrap();
    assert!(error.contains("did not become healthy"), "{}", error);
    assert!(failed.url.is_none());
}

#[tokio::test]
async fn test_status_includes_resources_when_ready() {
    let server = start().await;
    server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    server.wait_status("shop", "ready").await;

    let status: StatusView = server
        .http
        .get(server.url("/api/stores/shop/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.status, "ready");
    assert_eq!(status.url.as_deref(), Some("https://shop.example.com"));
    let resources = status.kubernetes_resources.unwrap();
    assert_eq!(resources.namespace, "store-shop");
    assert_eq!(resources.deployments, vec!["woo-shop-wordpress".to_string()]);
}

#[tokio::test]
async fn test_delete_ready_store() {
    let server = start().await;
    server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    server.wait_status("shop", "ready").await;

    let response = server
        .http
        .delete(server.url("/api/stores/shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: DeleteResponse = response.json().await.unwrap();
    assert_eq!(body.store.name, "shop");
    assert_eq!(body.store.status, "deleting");

    server.wait_gone("shop").await;
}

#[tokio::test]
async fn test_delete_during_provisioning_cancels() {
    let server = start().await;
    server.prober.set_delay(Duration::from_secs(10));

    server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    server.wait_status("shop", "provisioning").await;

    let response = server
        .http
        .delete(server.url("/api/stores/shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    server.wait_gone("shop").await;
}

#[tokio::test]
async fn test_delete_conflicts_when_task_does_not_stop() {
    let server = start().await;
    server
        .setup
        .set_delay(Duration::from_secs(2))
        .set_ignore_cancel(true);

    server.create(json!({"name": "shop", "type": "woocommerce"})).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.setup.runs() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "setup never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = server
        .http
        .delete(server.url("/api/stores/shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(error_of(response).await.contains("did not stop"));
}
