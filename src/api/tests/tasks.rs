use super::*;
use crate::error::WorkError;
use crate::types::TaskId;

const SETTLE: Duration = Duration::from_secs(10);

async fn submit(app: &Router, body: serde_json::Value) -> TaskId {
    let response = app
        .clone()
        .oneshot(post_json("/tasks", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["status"], "pending");
    json["task_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_submit_poll_and_fetch_results() {
    let (app, orchestrator) =
        create_test_app(ScriptedSource::new().with_pages("blog.example", 4)).await;

    let id = submit(&app, serde_json::json!({ "seed": "https://blog.example/" })).await;
    orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = json_body(response).await;
    assert_eq!(snapshot["task_id"], id.to_string());
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["total_items"], 4);
    assert_eq!(snapshot["completed_items"], 4);
    assert_eq!(snapshot["progress_percent"], 100.0);

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{}/results?include_errors=true", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bundle = json_body(response).await;
    assert_eq!(bundle["results"].as_array().unwrap().len(), 4);
    assert_eq!(bundle["errors"], serde_json::json!([]));
    assert_eq!(bundle["summary"]["coverage"], "all_succeeded");
}

#[tokio::test]
async fn test_submit_uses_request_config() {
    let (app, orchestrator) =
        create_test_app(ScriptedSource::new().with_pages("blog.example", 4)).await;

    let id = submit(
        &app,
        serde_json::json!({
            "seed": "https://blog.example/posts/only",
            "config": { "max_depth": 0, "item_timeout": 2000 }
        }),
    )
    .await;
    orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();

    let items = orchestrator.task_items(id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].target, "https://blog.example/posts/only");
}

#[tokio::test]
async fn test_submit_invalid_config_is_bad_request() {
    let (app, orchestrator) = create_test_app(ScriptedSource::new()).await;

    let response = app
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({
                "seed": "https://blog.example/",
                "config": { "max_concurrent_items": 0 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "invalid_config");
    assert_eq!(json["error"]["details"]["key"], "max_concurrent_items");
    assert!(orchestrator.list_tasks(None, None).is_empty());
}

#[tokio::test]
async fn test_submit_oversized_concurrency_is_bad_request() {
    let (app, orchestrator) = create_test_app(ScriptedSource::new()).await;

    let response = app
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({
                "seed": "https://blog.example/",
                "config": { "max_concurrent_items": usize::MAX }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["details"]["key"], "max_concurrent_items");
    assert!(orchestrator.list_tasks(None, None).is_empty());
}

#[tokio::test]
async fn test_submit_after_shutdown_is_unavailable() {
    let (app, orchestrator) = create_test_app(ScriptedSource::new()).await;
    orchestrator.shutdown().await.unwrap();

    let response = app
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({ "seed": "https://blog.example/" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "shutting_down");
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let (app, _orchestrator) = create_test_app(ScriptedSource::new()).await;
    let missing = TaskId::new();

    for uri in [
        format!("/tasks/{}", missing),
        format!("/tasks/{}/results", missing),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json_body(response).await["error"]["code"], "task_not_found");
    }

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/tasks/{}/cancel", missing),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/tasks/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_results_of_running_task_conflict_until_partial_accepted() {
    let source = ScriptedSource::new()
        .with_links(["https://a.example/posts/1", "https://stuck.example/posts/1"])
        .rule("stuck.example", Behavior::Hang);
    let (app, orchestrator) = create_test_app(source).await;

    let id = submit(&app, serde_json::json!({ "seed": "https://a.example/" })).await;
    let deadline = tokio::time::Instant::now() + SETTLE;
    while orchestrator.get_status(id).unwrap().succeeded_items < 1 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{}/results", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_ready");
    assert_eq!(json["error"]["details"]["status"], "running");

    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{}/results?accept_partial=true", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bundle = json_body(response).await;
    assert_eq!(bundle["status"], "running");
    assert_eq!(bundle["results"].as_array().unwrap().len(), 1);
    assert!(bundle.get("errors").is_none_or(|errors| errors.is_null()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/tasks/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["cancelled"], true);

    let snapshot = orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);

    // Cancelling a terminal task is not an error, it just reports false
    let response = app
        .oneshot(post_json(
            &format!("/tasks/{}/cancel", id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["cancelled"], false);
}

#[tokio::test]
async fn test_list_tasks_with_filter_and_limit() {
    let source = ScriptedSource::new()
        .with_links(["https://a.example/posts/1"])
        .rule(
            "a.example",
            Behavior::FailAlways(WorkError::Permanent("HTTP 404".into())),
        );
    let (app, orchestrator) = create_test_app(source).await;

    for _ in 0..3 {
        let id = submit(&app, serde_json::json!({ "seed": "https://a.example/" })).await;
        orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();
    }

    let response = app.clone().oneshot(get("/tasks")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 3);

    let response = app
        .clone()
        .oneshot(get("/tasks?status=failed&limit=2"))
        .await
        .unwrap();
    let listed = json_body(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|task| task["status"] == "failed"));

    let response = app
        .clone()
        .oneshot(get("/tasks?status=completed"))
        .await
        .unwrap();
    assert!(json_body(response).await.as_array().unwrap().is_empty());

    let response = app.oneshot(get("/tasks?status=bogus")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_with_default_config_uses_task_defaults() {
    let mut config = test_config();
    config.task_defaults = fast_task_config();
    config.task_defaults.max_depth = 0;
    let (app, orchestrator) =
        create_test_app_with(config, ScriptedSource::new().with_pages("blog.example", 3)).await;

    let id = submit(&app, serde_json::json!({ "seed": "https://blog.example/" })).await;
    let snapshot = orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();
    assert_eq!(snapshot.total_items, 1);
}
