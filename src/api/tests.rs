use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::create_router;
use crate::config::{AppConfig, LifecycleConfig};
use crate::container::ContainerManager;
use crate::network::NetworkManager;
use crate::runtime::fake::FakeRuntime;
use crate::store::ResourceStore;
use crate::AppState;

fn app() -> Router {
    let mut config = AppConfig::default();
    config.lifecycle = LifecycleConfig {
        stop_grace_seconds: 1,
        runtime_timeout_seconds: 1,
        exec_timeout_seconds: 2,
        log_poll_interval_ms: 10,
        liveness_sweep_ms: 50,
    };
    config.metrics.enabled = false;

    let store = Arc::new(ResourceStore::in_memory());
    let network_manager = Arc::new(NetworkManager::new(store.clone(), &config.network));
    let container_manager = Arc::new(ContainerManager::new(
        store.clone(),
        network_manager.clone(),
        Arc::new(FakeRuntime::new()),
        config.lifecycle.clone(),
    ));

    create_router(Arc::new(AppState {
        config,
        store,
        container_manager,
        network_manager,
        started_at: Instant::now(),
    }))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn web() -> Value {
    json!({
        "name": "web",
        "image": "nginx",
        "command": "nginx -g daemon off;",
        "port_mapping": ["8080:80"],
        "detach": true
    })
}

#[tokio::test]
async fn test_container_lifecycle_over_http() {
    let app = app();

    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "created");
    assert_eq!(body["data"]["port_mapping"], json!(["8080:80"]));
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 64);

    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers/web/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");
    assert!(body["data"]["pid"].is_u64());

    // prefix lookup
    let (status, body) = send_json(&app, Method::GET, &format!("/api/v1/containers/{}", &id[..8]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "web");

    let (status, body) = send_json(&app, Method::DELETE, "/api/v1/containers/web", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONTAINER_RUNNING");

    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers/stop/web?timeout=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "stopped");

    let (status, _) = send_json(&app, Method::DELETE, "/api/v1/containers/web", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(&app, Method::GET, "/api/v1/containers/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_errors() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/api/v1/containers", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", String::from_utf8_lossy(&body));

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/containers",
        Some(json!({"image": "nginx", "command": "nginx", "memory": "lots"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;
    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NAME_CONFLICT");

    // would be shadowed by /containers/logs/:id
    let mut logs = web();
    logs["name"] = json!("logs");
    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers", Some(logs)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_list_containers() {
    let app = app();
    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;

    let (status, body) = send_json(&app, Method::GET, "/api/v1/containers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_created_container_is_conflict() {
    let app = app();
    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;

    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers/stop/web", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
}

#[tokio::test]
async fn test_logs_without_follow() {
    let app = app();
    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;
    send_json(&app, Method::POST, "/api/v1/containers/web/start", None).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/containers/logs/web?follow=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "started web\n");
}

#[tokio::test]
async fn test_logs_follow_ends_after_stop() {
    let app = app();
    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;
    send_json(&app, Method::POST, "/api/v1/containers/web/start", None).await;

    let reader = {
        let app = app.clone();
        tokio::spawn(async move { send(&app, Method::GET, "/api/v1/containers/logs/web", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    send_json(&app, Method::POST, "/api/v1/containers/stop/web", None).await;

    let (status, body) = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("log stream should end")
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().starts_with("started web"));
}

#[tokio::test]
async fn test_exec_collect_and_stream() {
    let app = app();
    send_json(&app, Method::POST, "/api/v1/containers", Some(web())).await;

    let exec = json!({"command": ["false"]});
    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers/web/exec", Some(exec.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");

    send_json(&app, Method::POST, "/api/v1/containers/web/start", None).await;
    let (status, body) = send_json(&app, Method::POST, "/api/v1/containers/web/exec", Some(exec)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"output": "false\n", "exit_code": 1}));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/containers/web/exec",
        Some(json!({"command": ["echo", "hi"], "stream": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "echo hi\n");

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/containers/web/exec",
        Some(json!({"command": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_network_lifecycle_over_http() {
    let app = app();

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/networks",
        Some(json!({"name": "br0", "driver": "bridge", "subnet": "10.0.0.0/24"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["subnet"], "10.0.0.0/24");

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/networks",
        Some(json!({"name": "bad", "subnet": "10.0.0.1/24"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_SUBNET");

    let mut a = web();
    a["network"] = json!("br0");
    let (_, created) = send_json(&app, Method::POST, "/api/v1/containers", Some(a)).await;
    assert!(created["data"]["ip_address"].as_str().unwrap().starts_with("10.0.0."));

    let (status, body) = send_json(&app, Method::GET, "/api/v1/networks/br0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["containers"], json!(["web"]));

    let (status, body) = send_json(&app, Method::DELETE, "/api/v1/networks/br0", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NETWORK_IN_USE");
    assert_eq!(body["details"]["containers"], json!(["web"]));

    send_json(&app, Method::DELETE, "/api/v1/containers/web", None).await;
    let (status, _) = send_json(&app, Method::DELETE, "/api/v1/networks/br0", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send_json(&app, Method::GET, "/api/v1/networks/br0", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_system_and_health() {
    let app = app();

    let (status, body) = send_json(&app, Method::GET, "/api/v1/system/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["api_version"], "1.0");

    let (status, body) = send_json(&app, Method::GET, "/api/v1/system/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["containers"], 0);
    assert_eq!(body["data"]["isolation"], "fake");

    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["containers_running"], 0);
}
