use super::*;
use crate::orchestrator::test_helpers::{
    Behavior, ScriptedSource, create_test_orchestrator_with, fast_task_config, test_config,
};
use crate::types::TaskStatus;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt; // for oneshot()

mod system;
mod tasks;

/// Router plus the orchestrator behind it, over a scripted source
async fn create_test_app(source: ScriptedSource) -> (Router, Arc<TaskOrchestrator>) {
    create_test_app_with(test_config(), source).await
}

async fn create_test_app_with(
    config: Config,
    source: ScriptedSource,
) -> (Router, Arc<TaskOrchestrator>) {
    let (orchestrator, _source) = create_test_orchestrator_with(config, source).await;
    let orchestrator = Arc::new(orchestrator);
    let config = orchestrator.get_config();
    (create_router(orchestrator.clone(), config), orchestrator)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (_app, orchestrator) = create_test_app(ScriptedSource::new()).await;

    let mut config = (*orchestrator.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap(); // Port 0 = OS assigns a free port
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { start_api_server(orchestrator, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be serving");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let mut config = test_config();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let (app, _orchestrator) = create_test_app_with(config, ScriptedSource::new()).await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let mut config = test_config();
    config.api.cors_enabled = false;
    let (app, _orchestrator) = create_test_app_with(config, ScriptedSource::new()).await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[test]
fn test_cors_layer_with_specific_origins() {
    // Unparseable origins are dropped rather than failing the router
    let _layer = build_cors_layer(&[
        "http://localhost:3000".to_string(),
        "not a header\nvalue".to_string(),
    ]);
}
