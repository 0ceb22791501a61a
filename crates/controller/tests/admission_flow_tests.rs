//! Admission Flow Tests
//!
//! Drives both admission endpoints through the HTTP router with an in-memory
//! store, the same way the API server calls them.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use bootchain_controller::tasks::config::ImagesConfig;
use bootchain_controller::tasks::store::DependencyStore;
use bootchain_controller::webhook::{self, AdmissionState};
use bootchain_controller::{BootDependency, Result};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct InMemoryStore {
    items: Vec<BootDependency>,
}

#[async_trait]
impl DependencyStore for InMemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<BootDependency>> {
        Ok(self
            .items
            .iter()
            .find(|bd| bd.namespace().as_deref() == Some(namespace) && bd.name_any() == name)
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<BootDependency>> {
        Ok(self
            .items
            .iter()
            .filter(|bd| bd.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}

fn boot_dependency(name: &str, depends_on: Value) -> Value {
    json!({
        "apiVersion": "core.bootchain-operator.ruicoelho.dev/v1alpha1",
        "kind": "BootDependency",
        "metadata": {"name": name, "namespace": "shop"},
        "spec": {"dependsOn": depends_on}
    })
}

fn app(items: Vec<Value>) -> axum::Router {
    let items = items
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect();
    webhook::router(AdmissionState {
        store: Arc::new(InMemoryStore { items }),
        images: Arc::new(ImagesConfig::default()),
    })
}

fn review(kind: Value, resource: Value, operation: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "0df28fbd-5f5f-4cba-a3b1-4a3c7f1c2a10",
            "kind": kind,
            "resource": resource,
            "name": object["metadata"]["name"].clone(),
            "namespace": "shop",
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:shop:deployer"},
            "object": object,
            "dryRun": false
        }
    })
}

fn deployment_review(name: &str) -> Value {
    review(
        json!({"group": "apps", "version": "v1", "kind": "Deployment"}),
        json!({"group": "apps", "version": "v1", "resource": "deployments"}),
        "CREATE",
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "shop"},
            "spec": {
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {"containers": [{"name": "app", "image": "shop/app:1.0"}]}
                }
            }
        }),
    )
}

fn boot_dependency_review(operation: &str, object: Value) -> Value {
    review(
        json!({"group": "core.bootchain-operator.ruicoelho.dev", "version": "v1alpha1", "kind": "BootDependency"}),
        json!({"group": "core.bootchain-operator.ruicoelho.dev", "version": "v1alpha1", "resource": "bootdependencies"}),
        operation,
        object,
    )
}

async fn post(app: axum::Router, path: &str, body: &Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_gated_deployment_receives_json_patch() {
    let app = app(vec![boot_dependency(
        "checkout",
        json!([
            {"service": "payments", "port": 8080, "httpPath": "/healthz"},
            {"host": "db.example.com", "port": 5432}
        ]),
    )]);

    let reply = post(app, "/mutate-apps-v1-deployment", &deployment_review("checkout")).await;

    assert_eq!(reply["kind"], "AdmissionReview");
    assert_eq!(reply["response"]["uid"], "0df28fbd-5f5f-4cba-a3b1-4a3c7f1c2a10");
    assert_eq!(reply["response"]["allowed"], true);
    assert_eq!(reply["response"]["patchType"], "JSONPatch");
    assert!(reply["response"]["patch"].is_string());
}

#[tokio::test]
async fn test_ungated_deployment_is_admitted_untouched() {
    let app = app(vec![]);

    let reply = post(app, "/mutate-apps-v1-deployment", &deployment_review("catalog")).await;

    assert_eq!(reply["response"]["allowed"], true);
    assert!(reply["response"].get("patch").map_or(true, Value::is_null));
}

#[tokio::test]
async fn test_cycle_through_three_resources_is_denied() {
    let app = app(vec![
        boot_dependency("frontend", json!([{"service": "checkout", "port": 80}])),
        boot_dependency("checkout", json!([{"service": "payments", "port": 80}])),
    ]);

    let candidate = boot_dependency("payments", json!([{"service": "frontend", "port": 80}]));
    let reply = post(
        app,
        "/validate-core-bootchain-operator-ruicoelho-dev-v1alpha1-bootdependency",
        &boot_dependency_review("CREATE", candidate),
    )
    .await;

    assert_eq!(reply["response"]["allowed"], false);
    assert_eq!(
        reply["response"]["status"]["message"],
        "circular dependency detected: payments → frontend → checkout → payments"
    );
}

#[tokio::test]
async fn test_external_host_never_closes_a_cycle() {
    let app = app(vec![boot_dependency(
        "checkout",
        json!([{"service": "payments", "port": 80}]),
    )]);

    let candidate = boot_dependency("payments", json!([{"host": "checkout", "port": 80}]));
    let reply = post(
        app,
        "/validate-core-bootchain-operator-ruicoelho-dev-v1alpha1-bootdependency",
        &boot_dependency_review("CREATE", candidate),
    )
    .await;

    assert_eq!(reply["response"]["allowed"], true);
}

#[tokio::test]
async fn test_declaration_with_both_targets_is_denied() {
    let app = app(vec![]);

    let candidate = boot_dependency(
        "checkout",
        json!([{"service": "payments", "host": "payments.example.com", "port": 80}]),
    );
    let reply = post(
        app,
        "/validate-core-bootchain-operator-ruicoelho-dev-v1alpha1-bootdependency",
        &boot_dependency_review("UPDATE", candidate),
    )
    .await;

    assert_eq!(reply["response"]["allowed"], false);
    let message = reply["response"]["status"]["message"].as_str().unwrap();
    assert!(message.contains("mutually exclusive"), "{message}");
}
