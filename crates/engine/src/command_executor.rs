//! Command Executor (§4.3)
//!
//! Turns one [`WorkflowCommand`] into its side effect plus the
//! corresponding Scheduled history event. Side effects that settle
//! asynchronously (tasks, child workflows, transactions, store ops)
//! report their result back onto the owning execution's queue rather
//! than blocking the command executor itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use crate::model::{
    EmittedEvent, ExecutionId, HistoryEvent, SignalTarget, StoreKind, TimerDue, WorkflowCommand,
};
use crate::signal::SignalRouter;
use crate::store::{EntityStore, EntityWrite, ExecutionQueue, StoreError, TaskDispatch, TaskQueueStore};
use crate::timer::{TimerRequest, TimerService};
use crate::transaction::{self, TransactionOutcome, TransactionRegistry};

/// Starts a child execution on behalf of a `StartChildWorkflow`
/// command, without handing the command executor the whole `Engine`.
#[async_trait]
pub trait ChildWorkflowStarter: Send + Sync + 'static {
    async fn start_child(
        &self,
        parent: &ExecutionId,
        seq: u32,
        workflow_name: &str,
        input: serde_json::Value,
    ) -> Result<(), CommandError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Executes [`WorkflowCommand`]s issued by one workflow run.
pub struct CommandExecutor {
    task_queue: Arc<dyn TaskQueueStore>,
    queue: Arc<dyn ExecutionQueue>,
    timers: Arc<TimerService>,
    signals: Arc<SignalRouter>,
    entities: Arc<dyn EntityStore>,
    transactions: Arc<TransactionRegistry>,
    children: Arc<dyn ChildWorkflowStarter>,
}

impl CommandExecutor {
    pub fn new(
        task_queue: Arc<dyn TaskQueueStore>,
        queue: Arc<dyn ExecutionQueue>,
        timers: Arc<TimerService>,
        signals: Arc<SignalRouter>,
        entities: Arc<dyn EntityStore>,
        transactions: Arc<TransactionRegistry>,
        children: Arc<dyn ChildWorkflowStarter>,
    ) -> Self {
        Self {
            task_queue,
            queue,
            timers,
            signals,
            entities,
            transactions,
            children,
        }
    }

    /// Executes every command concurrently and collects the Scheduled
    /// event each one returns (§4.2 step h).
    pub async fn execute_all(
        &self,
        execution_id: &ExecutionId,
        workflow_name: &str,
        commands: Vec<WorkflowCommand>,
        base_time: DateTime<Utc>,
    ) -> Vec<HistoryEvent> {
        let futures = commands.into_iter().map(|command| {
            self.execute(execution_id, workflow_name, command, base_time)
        });
        futures::future::join_all(futures).await
    }

    #[instrument(skip(self, command), fields(%execution_id, seq = command.seq()))]
    async fn execute(
        &self,
        execution_id: &ExecutionId,
        workflow_name: &str,
        command: WorkflowCommand,
        base_time: DateTime<Utc>,
    ) -> HistoryEvent {
        match command {
            WorkflowCommand::StartTask { seq, name, input, options } => {
                self.start_task(execution_id, seq, name, input, options, base_time).await
            }
            WorkflowCommand::StartTimer { seq, due } => {
                self.start_timer(execution_id, seq, due, base_time).await
            }
            WorkflowCommand::StartChildWorkflow { seq, name, input } => {
                self.start_child_workflow(execution_id, seq, name, input).await
            }
            WorkflowCommand::SendSignal { seq, target, signal_id, payload, id } => {
                self.send_signal(execution_id, seq, target, signal_id, payload, id).await
            }
            WorkflowCommand::EmitEvents { seq, events } => self.emit_events(seq, events).await,
            WorkflowCommand::ExpectSignal { seq, signal_id, timeout } => {
                self.expect_signal(execution_id, seq, signal_id, timeout, base_time).await
            }
            WorkflowCommand::StartCondition { seq, timeout } => {
                self.start_condition(execution_id, seq, timeout, base_time).await
            }
            WorkflowCommand::InvokeTransaction { seq, name, input } => {
                self.invoke_transaction(execution_id, seq, name, input).await
            }
            WorkflowCommand::StoreOp { seq, kind, op } => {
                self.store_op(execution_id, workflow_name, seq, kind, op).await
            }
        }
    }

    async fn start_task(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        name: String,
        input: serde_json::Value,
        options: crate::model::TaskOptions,
        base_time: DateTime<Utc>,
    ) -> HistoryEvent {
        let timeout = options.start_to_close_timeout;
        let heartbeat_timeout = options.heartbeat_timeout;

        if let Err(e) = self
            .task_queue
            .enqueue(TaskDispatch {
                execution_id: execution_id.clone(),
                seq,
                name: name.clone(),
                input: input.clone(),
                options,
            })
            .await
        {
            warn!(%execution_id, seq, "failed to enqueue task dispatch: {e}");
        }

        if let Some(timeout) = timeout {
            let event = HistoryEvent::TaskFailed {
                seq,
                error: "Timeout".to_string(),
                message: "task exceeded its start-to-close timeout".to_string(),
                timestamp: base_time,
            };
            let _ = self
                .timers
                .schedule_event(execution_id.clone(), event, base_time + timeout)
                .await;
        }

        if let Some(heartbeat_timeout) = heartbeat_timeout {
            // No claim exists yet at dispatch time, so this monitor is
            // not tied to any particular claim attempt: it fires
            // unconditionally at base_time + heartbeat_timeout, the
            // same way the start-to-close timeout above does.
            let _ = self
                .timers
                .start_timer(TimerRequest::HeartbeatMonitor {
                    execution_id: execution_id.clone(),
                    seq,
                    claim_id: uuid::Uuid::now_v7(),
                    heartbeat_timeout,
                    due_at: base_time + heartbeat_timeout,
                })
                .await;
        }

        HistoryEvent::TaskScheduled { seq, name, input, timestamp: base_time }
    }

    async fn start_timer(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        due: TimerDue,
        base_time: DateTime<Utc>,
    ) -> HistoryEvent {
        let until_time = match due {
            TimerDue::Absolute(t) => t,
            TimerDue::Relative(d) => base_time + d,
        };

        let event = HistoryEvent::TimerCompleted { seq, timestamp: until_time };
        let _ = self
            .timers
            .schedule_event(execution_id.clone(), event, until_time)
            .await;

        HistoryEvent::TimerScheduled { seq, until_time, timestamp: base_time }
    }

    async fn start_child_workflow(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        name: String,
        input: serde_json::Value,
    ) -> HistoryEvent {
        if let Err(e) = self.children.start_child(execution_id, seq, &name, input.clone()).await {
            warn!(%execution_id, seq, "failed to start child workflow: {e}");
        }

        HistoryEvent::ChildWorkflowScheduled { seq, name, input, timestamp: Utc::now() }
    }

    async fn send_signal(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        target: SignalTarget,
        signal_id: String,
        payload: serde_json::Value,
        id: Option<String>,
    ) -> HistoryEvent {
        let target_execution_id = match &target {
            SignalTarget::Execution(id) => ExecutionId(id.clone()),
            SignalTarget::Child { parent, seq: child_seq } => {
                ExecutionId(ExecutionId::child(&ExecutionId(parent.clone()), *child_seq))
            }
        };
        let dedup_key = id.unwrap_or_else(|| format!("{execution_id}/{seq}"));

        if let Err(e) = self
            .signals
            .send_signal(target_execution_id.clone(), signal_id.clone(), payload.clone(), Some(dedup_key))
            .await
        {
            warn!(%execution_id, seq, "failed to deliver signal: {e}");
        }

        HistoryEvent::SignalSent {
            seq,
            execution_id: target_execution_id.0,
            signal_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    async fn emit_events(&self, seq: u32, events: Vec<EmittedEvent>) -> HistoryEvent {
        self.signals.emit_events(events.clone()).await;
        HistoryEvent::EventsEmitted { seq, events, timestamp: Utc::now() }
    }

    async fn expect_signal(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        signal_id: String,
        timeout: Option<Duration>,
        base_time: DateTime<Utc>,
    ) -> HistoryEvent {
        let timeout_time = timeout.map(|d| base_time + d);
        if let Some(deadline) = timeout_time {
            let event = HistoryEvent::SignalTimedOut { seq, signal_id: signal_id.clone(), timestamp: deadline };
            let _ = self.timers.schedule_event(execution_id.clone(), event, deadline).await;
        }
        HistoryEvent::SignalExpectStarted { seq, signal_id, timeout_time, timestamp: base_time }
    }

    async fn start_condition(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        timeout: Option<Duration>,
        base_time: DateTime<Utc>,
    ) -> HistoryEvent {
        let timeout_time = timeout.map(|d| base_time + d);
        if let Some(deadline) = timeout_time {
            let event = HistoryEvent::ConditionTimedOut { seq, timestamp: deadline };
            let _ = self.timers.schedule_event(execution_id.clone(), event, deadline).await;
        }
        HistoryEvent::ConditionStarted { seq, timeout_time, timestamp: base_time }
    }

    async fn invoke_transaction(
        &self,
        execution_id: &ExecutionId,
        seq: u32,
        name: String,
        input: serde_json::Value,
    ) -> HistoryEvent {
        let queue = self.queue.clone();
        let entities = self.entities.clone();
        let transactions = self.transactions.clone();
        let signals = self.signals.clone();
        let execution_id = execution_id.clone();
        let name_for_run = name.clone();
        let input_for_run = input.clone();
        let retry_policy = crate::reliability::RetryPolicy::default();

        tokio::spawn(async move {
            let outcome = transaction::run(&transactions, entities, &name_for_run, input_for_run, &retry_policy).await;
            let result_event = match outcome {
                TransactionOutcome::Succeeded { output, events } => {
                    // Events a transaction emits are only fanned out once its
                    // commit has actually landed, never on a retried attempt.
                    if !events.is_empty() {
                        signals.emit_events(events).await;
                    }
                    HistoryEvent::TransactionRequestSucceeded { seq, output, timestamp: Utc::now() }
                }
                TransactionOutcome::Failed { error, message } => {
                    HistoryEvent::TransactionRequestFailed { seq, error, message, timestamp: Utc::now() }
                }
            };
            let _ = queue.enqueue(&execution_id, vec![result_event]).await;
        });

        HistoryEvent::TransactionRequest { seq, name, input, timestamp: Utc::now() }
    }

    /// Routes `EntityOp`/`BucketOp`/`SearchOp` through the single
    /// versioned [`EntityStore`] — the distilled contract does not
    /// differentiate the three beyond their `StoreKind` tag, and no
    /// separate bucket/search backend exists yet (see `DESIGN.md`).
    async fn store_op(
        &self,
        execution_id: &ExecutionId,
        _workflow_name: &str,
        seq: u32,
        kind: StoreKind,
        op: crate::model::StoreOperation,
    ) -> HistoryEvent {
        let queue = self.queue.clone();
        let entities = self.entities.clone();
        let execution_id = execution_id.clone();
        let op_for_task = op.clone();

        tokio::spawn(async move {
            let result_event = if op_for_task.input.is_null() {
                match entities.get(&op_for_task.name).await {
                    Ok(value) => HistoryEvent::StoreRequestSucceeded {
                        seq,
                        result: value.map(|v| v.value).unwrap_or(serde_json::Value::Null),
                        timestamp: Utc::now(),
                    },
                    Err(e) => HistoryEvent::StoreRequestFailed {
                        seq,
                        error: "StoreError".to_string(),
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    },
                }
            } else {
                let write = EntityWrite::Set { key: op_for_task.name.clone(), value: op_for_task.input.clone() };
                match entities.commit_if_unchanged(&[], std::slice::from_ref(&write)).await {
                    Ok(true) => HistoryEvent::StoreRequestSucceeded {
                        seq,
                        result: op_for_task.input,
                        timestamp: Utc::now(),
                    },
                    Ok(false) => HistoryEvent::StoreRequestFailed {
                        seq,
                        error: "Conflict".to_string(),
                        message: "unconditional write unexpectedly conflicted".to_string(),
                        timestamp: Utc::now(),
                    },
                    Err(e) => HistoryEvent::StoreRequestFailed {
                        seq,
                        error: "StoreError".to_string(),
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    },
                }
            };
            let _ = queue.enqueue(&execution_id, vec![result_event]).await;
        });

        HistoryEvent::StoreRequest {
            seq,
            kind,
            op: serde_json::to_value(&op).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::RetryPolicy;
    use crate::store::InMemoryStore;

    struct NoopChildren;

    #[async_trait]
    impl ChildWorkflowStarter for NoopChildren {
        async fn start_child(
            &self,
            _parent: &ExecutionId,
            _seq: u32,
            _workflow_name: &str,
            _input: serde_json::Value,
        ) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn executor(store: Arc<InMemoryStore>) -> CommandExecutor {
        let timers = Arc::new(TimerService::new(store.clone(), store.clone(), Default::default()));
        let signals = Arc::new(SignalRouter::new(store.clone(), store.clone(), RetryPolicy::no_retry()));
        CommandExecutor::new(
            store.clone(),
            store.clone(),
            timers,
            signals,
            store.clone(),
            Arc::new(TransactionRegistry::new()),
            Arc::new(NoopChildren),
        )
    }

    #[tokio::test]
    async fn start_task_enqueues_dispatch_and_returns_task_scheduled() {
        let store = Arc::new(InMemoryStore::new());
        let exec = executor(store.clone());
        let execution_id = ExecutionId::new("wf", "run-1");

        let event = exec
            .execute(
                &execution_id,
                "wf",
                WorkflowCommand::StartTask {
                    seq: 0,
                    name: "charge_card".to_string(),
                    input: serde_json::json!("order-1"),
                    options: crate::model::TaskOptions::default(),
                },
                Utc::now(),
            )
            .await;

        assert!(matches!(event, HistoryEvent::TaskScheduled { seq: 0, .. }));
        let claimed = store.claim("w1", &[], 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn send_signal_resolves_child_target_deterministically() {
        let store = Arc::new(InMemoryStore::new());
        let exec = executor(store.clone());
        let parent = ExecutionId::new("wf", "run-1");

        let event = exec
            .execute(
                &parent,
                "wf",
                WorkflowCommand::SendSignal {
                    seq: 2,
                    target: SignalTarget::Child { parent: parent.0.clone(), seq: 1 },
                    signal_id: "approve".to_string(),
                    payload: serde_json::json!(true),
                    id: None,
                },
                Utc::now(),
            )
            .await;

        match event {
            HistoryEvent::SignalSent { execution_id, .. } => {
                assert_eq!(execution_id, ExecutionId::child(&parent, 1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
