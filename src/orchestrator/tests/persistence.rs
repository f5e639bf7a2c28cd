use super::*;
use crate::config::Config;
use crate::db::NewTask;
use crate::orchestrator::persist::INTERRUPTED_MESSAGE;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

fn config_at(path: &Path) -> Config {
    let mut config = test_config();
    config.persistence.database_path = Some(path.to_path_buf());
    config
}

#[tokio::test]
async fn test_terminal_task_is_written_with_its_items() {
    let source = ScriptedSource::new()
        .with_links(["https://a.example/posts/1", "https://b.example/posts/1"])
        .rule(
            "b.example",
            Behavior::FailAlways(WorkError::Permanent("HTTP 404".into())),
        );
    let (orchestrator, _source, _temp_dir) = create_persistent_orchestrator(source).await;

    let id = run_to_end(&orchestrator, fast_task_config(), "https://a.example/").await;

    let db = orchestrator.db.as_ref().unwrap();
    let row = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(row.task_status(), Some(TaskStatus::PartiallyCompleted));
    assert_eq!(row.seed, "https://a.example/");
    assert_eq!(row.total_items, 2);
    assert_eq!(row.succeeded_items, 1);
    assert_eq!(row.failed_items, 1);
    assert!(row.completed_at.is_some());

    let items = db.get_items(id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].target, "https://a.example/posts/1");
    assert_eq!(items[0].outcome, "success");
    assert!(items[0].payload.is_some());
    assert_eq!(items[1].outcome, "failed");
    assert_eq!(items[1].error_kind.as_deref(), Some("permanent"));
}

#[tokio::test]
async fn test_restart_restores_terminal_tasks_and_fails_interrupted_ones() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("tasks.db");

    let (first, _source) = create_test_orchestrator_with(
        config_at(&path),
        ScriptedSource::new().with_pages("a.example", 3),
    )
    .await;
    let finished = run_to_end(&first, fast_task_config(), "https://a.example/").await;
    let before = first.get_results(finished, true, false).unwrap();

    // A task that was still pending when the previous process went away
    let interrupted = TaskId::new();
    let task_config = fast_task_config();
    first
        .db
        .as_ref()
        .unwrap()
        .insert_task(&NewTask {
            id: interrupted,
            seed: "https://b.example/",
            config: &task_config,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let source = Arc::new(ScriptedSource::new());
    let second = TaskOrchestrator::new(config_at(&path), source.clone())
        .await
        .unwrap();

    let restored = second.get_status(finished).unwrap();
    assert_eq!(restored.status, TaskStatus::Completed);
    assert_eq!(restored.total_items, 3);
    assert_eq!(restored.succeeded_items, 3);

    let after = second.get_results(finished, true, false).unwrap();
    assert_eq!(after.results, before.results);
    assert_eq!(after.summary.coverage, Coverage::AllSucceeded);

    let failed = second.get_status(interrupted).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(failed.completed_at.is_some());

    // Restored tasks are history only, nothing runs again
    assert_eq!(source.total_calls(), 0);
    assert_eq!(second.list_tasks(None, None).len(), 2);
}

#[tokio::test]
async fn test_cleanup_removes_rows_from_the_store() {
    let (orchestrator, _source, _temp_dir) =
        create_persistent_orchestrator(ScriptedSource::new().with_pages("a.example", 2)).await;

    let id = run_to_end(&orchestrator, fast_task_config(), "https://a.example/").await;
    assert_eq!(orchestrator.cleanup_completed(Duration::ZERO).await, 1);

    let db = orchestrator.db.as_ref().unwrap();
    assert!(db.get_task(id).await.unwrap().is_none());
    assert!(db.get_items(id).await.unwrap().is_empty());
}
