//! End-to-end scenarios driving a full in-memory engine stack:
//! `start_execution` -> `drain_orchestrator` -> feed completions ->
//! drain again, asserting on the resulting history and terminal
//! status. Each test wires its own engine so workflow names never
//! collide across tests.

use std::sync::Arc;
use std::time::Duration;

use durable_engine::config::OrchestratorConfig;
use durable_engine::error::encode_task_token;
use durable_engine::prelude::*;

fn build_engine(registry: WorkflowRegistry) -> (Arc<InMemoryStore>, Arc<Engine>) {
    let store = Arc::new(InMemoryStore::new());
    let timers = Arc::new(TimerService::new(store.clone(), store.clone(), TimerServiceConfig::default()));
    let signals = Arc::new(SignalRouter::new(store.clone(), store.clone(), RetryPolicy::no_retry()));
    let transactions = Arc::new(TransactionRegistry::new());
    let registry = Arc::new(registry);
    let handle = EngineHandle::new();

    let commands = Arc::new(CommandExecutor::new(
        store.clone(),
        store.clone(),
        timers.clone(),
        signals.clone(),
        store.clone(),
        transactions.clone(),
        Arc::new(handle.clone()),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        timers,
        registry,
        commands,
        OrchestratorConfig::default(),
    ));

    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        orchestrator,
        signals,
        transactions,
        store.clone(),
        RetryPolicy::no_retry(),
    ));
    handle.bind(engine.clone());

    (store, engine)
}

/// Drives `drain_orchestrator` until `execution_id` reaches a terminal
/// status or `max_iters` passes elapse, giving short timers a moment
/// to fire between passes.
async fn drain_until_terminal(engine: &Engine, execution_id: &ExecutionId, max_iters: usize) -> Execution {
    for _ in 0..max_iters {
        engine.drain_orchestrator(16).await.unwrap();
        let execution = engine.get_execution(execution_id).await.unwrap().expect("execution must exist");
        if execution.status != ExecutionStatus::InProgress {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    engine.get_execution(execution_id).await.unwrap().expect("execution must exist")
}

// S1: single task success.
#[tokio::test]
async fn single_task_success() {
    let mut registry = WorkflowRegistry::new();
    registry.register("greeter", |ctx: WorkflowContext, name: String| async move {
        let msg: String = ctx.task("hello", name, TaskOptions::default()).await?;
        Ok::<_, WorkflowError>(msg)
    });
    let (store, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("greeter", "run-1", serde_json::json!("world"), None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    engine.drain_orchestrator(16).await.unwrap();
    let history = store.load(&execution_id).await.unwrap();
    assert!(history.iter().any(|e| matches!(e, HistoryEvent::TaskScheduled { seq: 0, name, .. } if name == "hello")));

    let token = encode_task_token(&execution_id, 0);
    engine.send_task_success(&token, serde_json::json!("hi world")).await.unwrap();

    let execution = drain_until_terminal(&engine, &execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result, Some(serde_json::json!("hi world")));
}

// S2: timer then task.
#[tokio::test]
async fn timer_then_task() {
    let mut registry = WorkflowRegistry::new();
    registry.register("sleeper", |ctx: WorkflowContext, _input: ()| async move {
        ctx.timer(Duration::from_millis(20)).await;
        let value: i64 = ctx.task("a", serde_json::Value::Null, TaskOptions::default()).await?;
        Ok::<_, WorkflowError>(value)
    });
    let (store, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("sleeper", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    engine.drain_orchestrator(16).await.unwrap();
    let history = store.load(&execution_id).await.unwrap();
    assert!(history.iter().any(|e| matches!(e, HistoryEvent::TimerScheduled { seq: 0, .. })));

    // Let the short-timer tier fire and enqueue the completion.
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.drain_orchestrator(16).await.unwrap();
    let history = store.load(&execution_id).await.unwrap();
    assert!(history.iter().any(|e| matches!(e, HistoryEvent::TaskScheduled { seq: 1, name, .. } if name == "a")));

    let token = encode_task_token(&execution_id, 1);
    engine.send_task_success(&token, serde_json::json!(42)).await.unwrap();

    let execution = drain_until_terminal(&engine, &execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result, Some(serde_json::json!(42)));
}

// S3: parallel tasks, settled output ordered by seq regardless of
// completion order.
#[tokio::test]
async fn parallel_tasks_settle_in_seq_order() {
    let mut registry = WorkflowRegistry::new();
    registry.register("duo", |ctx: WorkflowContext, _input: ()| async move {
        let (a, b) = futures::join!(
            ctx.task::<String>("a", serde_json::Value::Null, TaskOptions::default()),
            ctx.task::<String>("b", serde_json::Value::Null, TaskOptions::default()),
        );
        Ok::<_, WorkflowError>(vec![a?, b?])
    });
    let (store, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("duo", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    engine.drain_orchestrator(16).await.unwrap();
    let history = store.load(&execution_id).await.unwrap();
    assert!(history.iter().any(|e| matches!(e, HistoryEvent::TaskScheduled { seq: 0, name, .. } if name == "a")));
    assert!(history.iter().any(|e| matches!(e, HistoryEvent::TaskScheduled { seq: 1, name, .. } if name == "b")));

    // Feed seq 1 before seq 0 to exercise out-of-order delivery.
    engine
        .send_task_success(&encode_task_token(&execution_id, 1), serde_json::json!("B"))
        .await
        .unwrap();
    engine
        .send_task_success(&encode_task_token(&execution_id, 0), serde_json::json!("A"))
        .await
        .unwrap();

    let execution = drain_until_terminal(&engine, &execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result, Some(serde_json::json!(["A", "B"])));
}

// S4: expectSignal, both the delivered-signal success path and the
// timeout failure path.
#[tokio::test]
async fn signal_delivered_before_timeout_succeeds() {
    let mut registry = WorkflowRegistry::new();
    registry.register("waiter", |ctx: WorkflowContext, _input: ()| async move {
        match ctx.expect_signal::<String>("go", Some(Duration::from_secs(60))).await? {
            Some(payload) => Ok::<_, WorkflowError>(payload),
            None => Err(WorkflowError::new("timed out waiting for signal").with_code("Timeout")),
        }
    });
    let (_, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("waiter", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    engine.drain_orchestrator(16).await.unwrap();
    engine
        .send_signal(execution_id.clone(), "go", serde_json::json!("ok"), None)
        .await
        .unwrap();

    let execution = drain_until_terminal(&engine, &execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result, Some(serde_json::json!("ok")));
}

#[tokio::test]
async fn signal_timeout_fails_the_workflow() {
    let mut registry = WorkflowRegistry::new();
    registry.register("impatient_waiter", |ctx: WorkflowContext, _input: ()| async move {
        match ctx.expect_signal::<String>("go", Some(Duration::from_millis(20))).await? {
            Some(payload) => Ok::<_, WorkflowError>(payload),
            None => Err(WorkflowError::new("timed out waiting for signal").with_code("Timeout")),
        }
    });
    let (_, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("impatient_waiter", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    engine.drain_orchestrator(16).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let execution = drain_until_terminal(&engine, &execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_ref().map(|e| e.error.as_str()), Some("Timeout"));
}

// S5: child workflow completion plumbs back to the parent.
#[tokio::test]
async fn child_workflow_result_resolves_parent() {
    let mut registry = WorkflowRegistry::new();
    registry.register("sub", |_ctx: WorkflowContext, input: i64| async move { Ok::<_, WorkflowError>(input * 6) });
    registry.register("parent_wf", |ctx: WorkflowContext, _input: ()| async move {
        let result: i64 = ctx.child_workflow("sub", 7).await?;
        Ok::<_, WorkflowError>(result)
    });
    let (_, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("parent_wf", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    let execution = drain_until_terminal(&engine, &execution_id, 10).await;
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.result, Some(serde_json::json!(42)));
}

// S6: history diverges from the replayed program; no new commands are
// issued and the execution fails deterministically.
#[tokio::test]
async fn determinism_mismatch_fails_without_new_commands() {
    let mut registry = WorkflowRegistry::new();
    registry.register("flaky", |ctx: WorkflowContext, _input: serde_json::Value| async move {
        let _: String = ctx.task("a", serde_json::Value::Null, TaskOptions::default()).await?;
        Ok::<_, WorkflowError>(serde_json::Value::Null)
    });
    let (store, engine) = build_engine(registry);

    let outcome = engine
        .start_execution("flaky", "run-1", serde_json::Value::Null, None, None)
        .await
        .unwrap();
    let execution_id = outcome.execution_id;

    // Seed history with a scheduled event the workflow code never
    // issues first: the real run opens with a task, not a timer.
    let now = chrono::Utc::now();
    store
        .append(&execution_id, 0, vec![HistoryEvent::TimerScheduled { seq: 0, until_time: now, timestamp: now }])
        .await
        .unwrap();

    let failed = engine.drain_orchestrator(16).await.unwrap();
    assert!(failed.is_empty(), "a determinism fault is a terminal WorkflowFailed, not an orchestration failure");

    let history = store.load(&execution_id).await.unwrap();
    assert!(!history.iter().any(|e| matches!(e, HistoryEvent::TaskScheduled { .. })));

    let execution = engine.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_ref().map(|e| e.error.as_str()), Some("DeterminismError"));
}
