use crate::api::ApiServer;
use crate::claims::ClaimRegistry;
use crate::config::{ApiConfig, Config, MetadataConfig, NotebookConfig, RunnerConfig};
use crate::entries::EntryService;
use crate::metadata::MetadataStore;
use crate::notebook::{DirectBackend, NotebookAdapter};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

fn test_config(root: std::path::PathBuf) -> Config {
    Config {
        notebook: NotebookConfig {
            root: root.clone(),
            rich_backend_bin: None,
        },
        metadata: MetadataConfig {
            db_path: root.join(".cortex-meta.db"),
        },
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        runner: RunnerConfig {
            api_base_url: "http://127.0.0.1:0".to_string(),
            state_dir: root.join("state"),
            agent_binary: "true".to_string(),
            agent_model: None,
            max_parallel: 1,
            poll_interval_secs: 1,
            api_timeout_secs: 5,
            log_file: None,
        },
    }
}

async fn test_router() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let config = test_config(root.clone());
    let adapter =
        NotebookAdapter::with_backend(Arc::new(DirectBackend::new(root.clone())), root);
    let metadata = MetadataStore::open_in_memory().await.unwrap();
    let entries = Arc::new(EntryService::new(adapter, metadata).unwrap());
    let claims = Arc::new(ClaimRegistry::new());
    let server = ApiServer::new(&config, entries, claims).unwrap();
    (dir, server.build_router())
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_degraded_without_rich_backend() {
    let (_dir, router) = test_router().await;
    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["backendAvailable"], false);
    assert_eq!(body["dbAvailable"], true);
}

#[tokio::test]
async fn entry_crud_over_http() {
    let (_dir, router) = test_router().await;

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/v1/entries",
        Some(json!({
            "type": "plan",
            "title": "HTTP plan",
            "content": "Body text.\n\n## Goals\n\nShip.\n",
            "tags": ["api"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["type"], "plan");
    assert_eq!(created["status"], "active");
    assert!(created["link"].as_str().unwrap().contains("HTTP plan"));

    // Recall by id.
    let (status, entry) = send(&router, Method::GET, &format!("/api/v1/entries/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["title"], "HTTP plan");
    assert!(entry["content"].as_str().unwrap().contains("Body text."));

    // Recall by path (multi-segment ref).
    let path = entry["path"].as_str().unwrap().to_string();
    let (status, by_path) =
        send(&router, Method::GET, &format!("/api/v1/entries/{path}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_path["id"], id.as_str());

    // Section listing and extraction.
    let (status, sections) = send(
        &router,
        Method::GET,
        &format!("/api/v1/entries/{id}/sections"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sections["sections"][0]["title"], "Goals");

    let (status, section) = send(
        &router,
        Method::GET,
        &format!("/api/v1/entries/{id}/sections/goals?includeSubsections=false"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(section["content"].as_str().unwrap().contains("Ship."));

    // Field update.
    let (status, updated) = send(
        &router,
        Method::PATCH,
        &format!("/api/v1/entries/{id}"),
        Some(json!({"status": "in_progress"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "in_progress");

    // Empty update body is a validation error.
    let (status, _) = send(
        &router,
        Method::PATCH,
        &format!("/api/v1/entries/{id}"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Delete requires confirm.
    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/entries/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, deleted) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/entries/{id}?confirm=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (status, _) = send(&router, Method::GET, &format!("/api/v1/entries/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn seed_task(router: &Router, title: &str, depends_on: Vec<&str>) -> String {
    let (status, created) = send(
        router,
        Method::POST,
        "/api/v1/entries",
        Some(json!({
            "type": "task",
            "title": title,
            "project_id": "demo",
            "status": "pending",
            "depends_on": depends_on,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    created["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn task_classification_and_claims_over_http() {
    let (_dir, router) = test_router().await;
    let first = seed_task(&router, "First", vec![]).await;
    let second = seed_task(&router, "Second", vec!["First"]).await;

    let (status, projects) = send(&router, Method::GET, "/api/v1/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(projects["projects"], json!(["demo"]));

    let (status, report) = send(&router, Method::GET, "/api/v1/tasks/demo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["stats"]["total"], 2);
    assert_eq!(report["stats"]["ready"], 1);
    assert_eq!(report["stats"]["waiting"], 1);

    let (status, ready) = send(&router, Method::GET, "/api/v1/tasks/demo/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["count"], 1);
    assert_eq!(ready["tasks"][0]["id"], first.as_str());

    let (status, next) = send(&router, Method::GET, "/api/v1/tasks/demo/next", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["task"]["id"], first.as_str());

    // Claim flow: grant, conflict, release.
    let claim_uri = format!("/api/v1/tasks/demo/{first}/claim");
    let (status, granted) = send(
        &router,
        Method::POST,
        &claim_uri,
        Some(json!({"runnerId": "runner-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(granted["claimed"], true);

    let (status, conflict) = send(
        &router,
        Method::POST,
        &claim_uri,
        Some(json!({"runnerId": "runner-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["claimedBy"], "runner-1");
    assert_eq!(conflict["isStale"], false);

    let (status, claim_state) = send(
        &router,
        Method::GET,
        &format!("/api/v1/tasks/demo/{first}/claim-status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claim_state["claimed"], true);
    assert_eq!(claim_state["claim"]["runner_id"], "runner-1");

    let (status, released) = send(
        &router,
        Method::POST,
        &format!("/api/v1/tasks/demo/{first}/release"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["released"], true);

    // Second is waiting; no ready task once First is in progress.
    let (status, _) = send(
        &router,
        Method::PATCH,
        &format!("/api/v1/entries/{first}"),
        Some(json!({"status": "in_progress"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, missing) = send(&router, Method::GET, "/api/v1/tasks/demo/next", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["task"], Value::Null);
    assert!(missing["message"].as_str().unwrap().contains("demo"));
    let _ = second;
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    let (_dir, router) = test_router().await;

    let (status, _) = send(&router, Method::GET, "/api/v1/tasks/bad%2Fproject", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/tasks/demo/not-an-id/claim",
        Some(json!({"runnerId": "r"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, Method::GET, "/api/v1/stale?days=9999", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_without_backend_is_503_but_inject_succeeds() {
    let (_dir, router) = test_router().await;
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/search",
        Some(json!({"query": "anything"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, inject) = send(
        &router,
        Method::POST,
        "/api/v1/inject",
        Some(json!({"query": "anything"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(inject["block"]
        .as_str()
        .unwrap()
        .contains("Relevant Brain Context"));
    assert_eq!(inject["hits"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn features_over_http() {
    let (_dir, router) = test_router().await;
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/entries",
        Some(json!({
            "type": "task",
            "title": "Feature member",
            "project_id": "demo",
            "status": "pending",
            "feature_id": "auth",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, report) = send(&router, Method::GET, "/api/v1/features/demo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["features"][0]["id"], "auth");
    assert_eq!(report["features"][0]["status"], "ready");

    let (status, next) = send(&router, Method::GET, "/api/v1/features/demo/next", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["feature"]["id"], "auth");
}
