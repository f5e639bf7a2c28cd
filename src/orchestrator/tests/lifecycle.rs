use super::*;
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_event_sequence_of_a_task() {
    let (orchestrator, _source) =
        create_test_orchestrator(ScriptedSource::new().with_pages("a.example", 2)).await;
    let mut events = orchestrator.subscribe();

    let id = run_to_end(&orchestrator, fast_task_config(), "https://a.example/").await;

    let mut kinds = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => {
                match &event {
                    Event::TaskSubmitted { id: event_id, seed } => {
                        assert_eq!(*event_id, id);
                        assert_eq!(seed, "https://a.example/");
                    }
                    Event::TaskExpanded { total_items, .. } => assert_eq!(*total_items, 2),
                    Event::ItemSettled {
                        outcome, attempts, ..
                    } => {
                        assert_eq!(*outcome, ItemOutcome::Success);
                        assert_eq!(*attempts, 1);
                    }
                    Event::TaskFinished {
                        status,
                        succeeded_items,
                        ..
                    } => {
                        assert_eq!(*status, TaskStatus::Completed);
                        assert_eq!(*succeeded_items, 2);
                    }
                    _ => {}
                }
                kinds.push(event.kind());
            }
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("unexpected receive error: {e}"),
        }
    }

    assert_eq!(
        kinds,
        vec![
            "task_submitted",
            "task_started",
            "task_expanded",
            "item_settled",
            "item_settled",
            "task_finished",
        ]
    );
}

#[tokio::test]
async fn test_circuit_opened_event() {
    let source = ScriptedSource::new()
        .with_pages("down.example", 1)
        .rule("down.example", Behavior::FailAlways(WorkError::Timeout));
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 2;
    let (orchestrator, _source) = create_test_orchestrator_with(config, source).await;
    let mut events = orchestrator.subscribe();

    run_to_end(&orchestrator, fast_task_config(), "https://down.example/").await;

    let mut opened = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::CircuitOpened { target, failures } = event {
            opened.push((target, failures));
        }
    }
    assert_eq!(opened, vec![("down.example".to_string(), 2)]);
}

#[tokio::test]
async fn test_shutdown_cancels_live_tasks_and_rejects_new_ones() {
    let source = ScriptedSource::new()
        .with_pages("stuck.example", 2)
        .rule("stuck.example", Behavior::Hang);
    let mut config = test_config();
    config.orchestrator.max_concurrent_tasks = 1;
    let (orchestrator, source) = create_test_orchestrator_with(config, source).await;

    let running = orchestrator
        .submit(fast_task_config(), "https://stuck.example/")
        .await
        .unwrap();
    let queued = orchestrator
        .submit(fast_task_config(), "https://stuck.example/")
        .await
        .unwrap();
    eventually(|| source.in_flight() == 2).await;
    assert_eq!(
        orchestrator.get_status(queued).unwrap().status,
        TaskStatus::Pending
    );

    orchestrator.shutdown().await.unwrap();

    for id in [running, queued] {
        assert_eq!(
            orchestrator.get_status(id).unwrap().status,
            TaskStatus::Cancelled
        );
    }
    assert_eq!(orchestrator.get_status(queued).unwrap().total_items, 0);

    assert!(matches!(
        orchestrator
            .submit(fast_task_config(), "https://stuck.example/")
            .await,
        Err(Error::ShuttingDown)
    ));
    assert_eq!(orchestrator.list_tasks(None, None).len(), 2);
}

#[tokio::test]
async fn test_cleanup_evicts_only_expired_terminal_tasks() {
    let source = ScriptedSource::new()
        .with_links(["https://a.example/posts/1"])
        .rule("stuck.example", Behavior::Hang);
    let (orchestrator, _source) = create_test_orchestrator(source).await;

    let done = run_to_end(&orchestrator, fast_task_config(), "https://a.example/").await;
    assert_eq!(
        orchestrator
            .cleanup_completed(Duration::from_secs(3600))
            .await,
        0
    );
    assert!(orchestrator.get_status(done).is_ok());

    let mut events = orchestrator.subscribe();
    assert_eq!(orchestrator.cleanup_completed(Duration::ZERO).await, 1);
    assert!(matches!(
        orchestrator.get_status(done),
        Err(Error::TaskNotFound(_))
    ));
    match events.try_recv() {
        Ok(Event::TasksReaped { count }) => assert_eq!(count, 1),
        other => panic!("expected TasksReaped, got {other:?}"),
    }

    // Nothing left to evict, so no event either
    assert_eq!(orchestrator.cleanup_completed(Duration::ZERO).await, 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_cleanup_never_evicts_running_tasks() {
    let source = ScriptedSource::new()
        .with_pages("stuck.example", 1)
        .rule("stuck.example", Behavior::Hang);
    let (orchestrator, source) = create_test_orchestrator(source).await;

    let id = orchestrator
        .submit(fast_task_config(), "https://stuck.example/")
        .await
        .unwrap();
    eventually(|| source.in_flight() == 1).await;

    assert_eq!(orchestrator.cleanup_completed(Duration::ZERO).await, 0);
    assert_eq!(
        orchestrator.get_status(id).unwrap().status,
        TaskStatus::Running
    );

    orchestrator.cancel(id);
    orchestrator.wait_for_terminal(id, SETTLE).await.unwrap();
}

#[tokio::test]
async fn test_background_cleanup_task_evicts_and_stops_on_shutdown() {
    let mut config = test_config();
    config.orchestrator.retention = Duration::ZERO;
    config.orchestrator.cleanup_interval = Duration::from_millis(20);
    let (orchestrator, _source) =
        create_test_orchestrator_with(config, ScriptedSource::new().with_pages("a.example", 1))
            .await;

    let handle = orchestrator.start_cleanup_task();
    let id = run_to_end(&orchestrator, fast_task_config(), "https://a.example/").await;

    eventually(|| orchestrator.get_status(id).is_err()).await;

    orchestrator.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cleanup task should stop after shutdown")
        .unwrap();
}
