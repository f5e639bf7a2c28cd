use super::*;
use crate::types::{Event, TaskId};
use tokio_stream::StreamExt;

/// Read SSE frames until `done` holds for the accumulated text
///
/// Field separators are normalized to `name:value`.
async fn read_stream_until(body: Body, done: impl Fn(&str) -> bool) -> String {
    let mut stream = body.into_data_stream();
    let mut text = String::new();
    while !done(&text) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for SSE data")
            .expect("stream ended early")
            .unwrap();
        text.push_str(&std::str::from_utf8(&chunk).unwrap().replace(": ", ":"));
    }
    text
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _orchestrator) = create_test_app(ScriptedSource::new()).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_tasks"], 0);
    assert_eq!(health["max_concurrent_tasks"], 5);
    assert_eq!(health["free_global_slots"], 5);
    assert_eq!(health["open_circuits"], serde_json::json!([]));
    assert_eq!(health["status_distribution"]["pending"], 0);
    assert_eq!(health["error_stats"]["timeouts"], 0);
}

#[tokio::test]
async fn test_health_endpoint_reports_degraded() {
    let mut config = test_config();
    config.orchestrator.degraded_open_circuits = 0;
    config.circuit_breaker.failure_threshold = 1;
    let (app, orchestrator) = create_test_app_with(config, ScriptedSource::new()).await;

    orchestrator
        .circuit_breaker()
        .record_failure("https://down.example/");

    let health = json_body(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["open_circuits"], serde_json::json!(["down.example"]));
}

#[tokio::test]
async fn test_openapi_endpoint() {
    let (app, _orchestrator) = create_test_app(ScriptedSource::new()).await;

    let response = app.oneshot(get("/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let spec = json_body(response).await;
    assert!(spec["openapi"].as_str().unwrap().starts_with("3."));
    assert!(spec["paths"]["/tasks/{id}/results"].is_object());
}

#[tokio::test]
async fn test_sse_event_stream() {
    let (app, orchestrator) =
        create_test_app(ScriptedSource::new().with_pages("blog.example", 2)).await;

    let request = Request::builder()
        .uri("/events")
        .header("Accept", "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(
        content_type.contains("text/event-stream"),
        "Content-Type should be text/event-stream, got: {}",
        content_type
    );

    let id = orchestrator
        .submit(fast_task_config(), "https://blog.example/")
        .await
        .unwrap();

    let text = read_stream_until(response.into_body(), |text| {
        text.contains("event:task_finished")
    })
    .await;

    assert!(text.contains("event:task_submitted"));
    assert!(text.contains(&id.to_string()));
    assert!(text.contains("event:task_expanded"));
    assert!(text.contains("event:item_settled"));
    assert!(text.contains(r#""status":"completed""#));
}

#[tokio::test]
async fn test_sse_lagging_client_gets_error_event() {
    let mut config = test_config();
    config.orchestrator.event_buffer = 1;
    let (app, orchestrator) = create_test_app_with(config, ScriptedSource::new()).await;

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Overflow the one-slot buffer before the client reads anything
    for count in 1..=5 {
        orchestrator.emit_event(Event::TasksReaped { count });
    }
    orchestrator.emit_event(Event::TaskStarted { id: TaskId::new() });

    let text = read_stream_until(response.into_body(), |text| {
        text.contains("event:task_started")
    })
    .await;

    assert!(text.contains("event:error"), "{text}");
    assert!(text.contains(r#""error":"lagged""#), "{text}");
    assert!(text.contains(r#""skipped":5"#), "{text}");
}
