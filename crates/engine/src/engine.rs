//! Top-level service API (§6): the boundary external callers and task
//! handlers actually talk to. Wires together the stores, the
//! orchestrator, the command executor, the timer service and the
//! signal router behind one handle.
//!
//! [`Engine`] is handed to task handlers (as [`TaskServices`]) and to
//! the command executor (as [`ChildWorkflowStarter`]) through
//! [`EngineHandle`], a late-bound reference that sidesteps the
//! circular construction order: the command executor must exist
//! before the engine does, but the engine is what it calls back into.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::command_executor::{ChildWorkflowStarter, CommandError};
use crate::error::{decode_task_token, EngineError};
use crate::model::{
    EmittedEvent, Execution, ExecutionId, HistoryEvent, ParentRef, SignalTarget,
};
use crate::orchestrator::Orchestrator;
use crate::reliability::RetryPolicy;
use crate::signal::SignalRouter;
use crate::store::{
    EntityStore, ExecutionFilter, ExecutionQueue, ExecutionStore, HistoryStore, Pagination,
    TaskQueueStore,
};
use crate::task::TaskServices;
use crate::transaction::{self, TransactionRegistry};

/// Outcome of [`Engine::start_execution`].
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub execution_id: ExecutionId,
    pub already_running: bool,
}

/// Outcome of [`Engine::execute_transaction`].
pub enum TransactionOutcome {
    Succeeded { output: serde_json::Value },
    Failed { error: String, message: String },
}

/// Aggregates every store and service the engine needs to answer the
/// external API, drive orchestration and back task handlers.
pub struct Engine {
    executions: Arc<dyn ExecutionStore>,
    history: Arc<dyn HistoryStore>,
    queue: Arc<dyn ExecutionQueue>,
    task_queue: Arc<dyn TaskQueueStore>,
    orchestrator: Arc<Orchestrator>,
    signals: Arc<SignalRouter>,
    transactions: Arc<TransactionRegistry>,
    entities: Arc<dyn EntityStore>,
    transaction_retry: RetryPolicy,
}

impl Engine {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        history: Arc<dyn HistoryStore>,
        queue: Arc<dyn ExecutionQueue>,
        task_queue: Arc<dyn TaskQueueStore>,
        orchestrator: Arc<Orchestrator>,
        signals: Arc<SignalRouter>,
        transactions: Arc<TransactionRegistry>,
        entities: Arc<dyn EntityStore>,
        transaction_retry: RetryPolicy,
    ) -> Self {
        Self {
            executions,
            history,
            queue,
            task_queue,
            orchestrator,
            signals,
            transactions,
            entities,
            transaction_retry,
        }
    }

    /// `StartExecution` (§6). Idempotent on `(workflowName, executionName,
    /// inputHash)`: a retry with the same input is a no-op that returns
    /// `already_running=true`; the same name with a different input is a
    /// conflict.
    pub async fn start_execution(
        &self,
        workflow_name: &str,
        execution_name: &str,
        input: serde_json::Value,
        timeout: Option<Duration>,
        parent: Option<ParentRef>,
    ) -> Result<StartOutcome, EngineError> {
        let execution_id = ExecutionId::new(workflow_name, execution_name);
        let now = Utc::now();
        let timeout_time = timeout.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default());

        let execution = Execution::new(
            execution_id.clone(),
            workflow_name,
            input.clone(),
            now,
            parent,
            timeout_time,
        );
        let requested_hash = execution.input_hash.clone();

        let created = self.executions.create(execution).await?;
        if !created {
            let existing = self
                .executions
                .get(&execution_id)
                .await?
                .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.clone()))?;
            if existing.input_hash != requested_hash {
                return Err(EngineError::InputConflict {
                    execution_id,
                    existing_hash: existing.input_hash,
                    requested_hash,
                });
            }
            return Ok(StartOutcome { execution_id, already_running: true });
        }

        let started = HistoryEvent::WorkflowStarted { input, timeout_time, timestamp: now };
        self.queue.enqueue(&execution_id, vec![started]).await?;

        Ok(StartOutcome { execution_id, already_running: false })
    }

    pub async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, EngineError> {
        Ok(self.executions.get(execution_id).await?)
    }

    pub async fn list_executions(
        &self,
        filter: ExecutionFilter,
        page: Pagination,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(self.executions.list(filter, page).await?)
    }

    pub async fn get_execution_history(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryEvent>, EngineError> {
        Ok(self.history.load(execution_id).await?)
    }

    /// `SendSignal` (§6).
    pub async fn send_signal(
        &self,
        execution_id: ExecutionId,
        signal_id: &str,
        payload: serde_json::Value,
        id: Option<String>,
    ) -> Result<(), EngineError> {
        self.signals.send_signal(execution_id, signal_id, payload, id).await?;
        Ok(())
    }

    /// `EmitEvents` (§6).
    pub async fn emit_events(&self, events: Vec<EmittedEvent>) -> Result<(), EngineError> {
        self.signals.emit_events(events).await;
        Ok(())
    }

    /// `SendTaskSuccess` (§6).
    pub async fn send_task_success(&self, task_token: &str, result: serde_json::Value) -> Result<(), EngineError> {
        let (execution_id, seq) = decode_task_token(task_token)?;
        let event = HistoryEvent::TaskSucceeded { seq, result, timestamp: Utc::now() };
        self.queue.enqueue(&execution_id, vec![event]).await?;
        Ok(())
    }

    /// `SendTaskFailure` (§6).
    pub async fn send_task_failure(
        &self,
        task_token: &str,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), EngineError> {
        let (execution_id, seq) = decode_task_token(task_token)?;
        let event = HistoryEvent::TaskFailed {
            seq,
            error: error.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        self.queue.enqueue(&execution_id, vec![event]).await?;
        Ok(())
    }

    /// `SendTaskHeartbeat` (§6). The claim-row liveness update happens
    /// through [`TaskServices::send_heartbeat`] (reached by task
    /// handler code via `TaskContext::heartbeat`); a caller heartbeating
    /// purely by token has no claim id to update against, so this just
    /// validates the token shape.
    pub async fn send_task_heartbeat(&self, task_token: &str) -> Result<bool, EngineError> {
        let _ = decode_task_token(task_token)?;
        Ok(false)
    }

    /// `ExecuteTransaction` (§6). Runs synchronously to completion,
    /// unlike a workflow-issued `InvokeTransaction` command which
    /// settles out of band.
    pub async fn execute_transaction(&self, name: &str, input: serde_json::Value) -> Result<TransactionOutcome, EngineError> {
        match transaction::run(&self.transactions, self.entities.clone(), name, input, &self.transaction_retry).await {
            transaction::TransactionOutcome::Succeeded { output, events } => {
                self.signals.emit_events(events).await;
                Ok(TransactionOutcome::Succeeded { output })
            }
            transaction::TransactionOutcome::Failed { error, message } => Ok(TransactionOutcome::Failed { error, message }),
        }
    }

    /// Drains one batch of ready workflow tasks through the
    /// orchestrator. Exposed so a hosting binary can drive the
    /// orchestration loop on whatever schedule it likes.
    pub async fn drain_orchestrator(&self, max_batches: usize) -> Result<Vec<ExecutionId>, EngineError> {
        Ok(self.orchestrator.drain(max_batches).await?)
    }

    async fn start_child(
        &self,
        parent: &ExecutionId,
        seq: u32,
        workflow_name: &str,
        input: serde_json::Value,
    ) -> Result<(), EngineError> {
        let child_name = ExecutionId::child(parent, seq);
        let execution_id = ExecutionId::new(workflow_name, &child_name);
        let now = Utc::now();
        let execution = Execution::new(
            execution_id.clone(),
            workflow_name,
            input.clone(),
            now,
            Some(ParentRef { execution_id: parent.clone(), seq }),
            None,
        );

        if self.executions.create(execution).await? {
            let started = HistoryEvent::WorkflowStarted { input, timeout_time: None, timestamp: now };
            self.queue.enqueue(&execution_id, vec![started]).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TaskServices for Engine {
    async fn send_signal(
        &self,
        target: SignalTarget,
        signal_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        let target = resolve_signal_target(target);
        self.signals.send_signal(target, signal_id, payload, None).await?;
        Ok(())
    }

    async fn emit_events(&self, events: Vec<EmittedEvent>) -> Result<(), EngineError> {
        self.signals.emit_events(events).await;
        Ok(())
    }

    async fn start_child_workflow(
        &self,
        workflow_name: &str,
        execution_name: &str,
        input: serde_json::Value,
    ) -> Result<ExecutionId, EngineError> {
        let outcome = self.start_execution(workflow_name, execution_name, input, None, None).await?;
        Ok(outcome.execution_id)
    }

    async fn send_heartbeat(&self, claim_id: uuid::Uuid) -> Result<bool, EngineError> {
        let response = self.task_queue.heartbeat(claim_id, "task-handler").await?;
        Ok(response.should_cancel)
    }
}

fn resolve_signal_target(target: SignalTarget) -> ExecutionId {
    match target {
        SignalTarget::Execution(id) => ExecutionId(id),
        SignalTarget::Child { parent, seq } => ExecutionId(ExecutionId::child(&ExecutionId(parent), seq)),
    }
}

/// A late-bound reference to the engine, handed to the command
/// executor and the worker pool before the engine itself can exist
/// (both are built first, then wrapped together into an `Engine`).
/// Calling through the handle before [`EngineHandle::bind`] panics —
/// a programming error, not a runtime condition callers can recover
/// from.
#[derive(Clone, Default)]
pub struct EngineHandle(Arc<OnceLock<Arc<Engine>>>);

impl EngineHandle {
    pub fn new() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    pub fn bind(&self, engine: Arc<Engine>) {
        self.0
            .set(engine)
            .unwrap_or_else(|_| panic!("EngineHandle bound twice"));
    }

    fn get(&self) -> &Engine {
        self.0.get().expect("EngineHandle used before bind()")
    }
}

#[async_trait]
impl ChildWorkflowStarter for EngineHandle {
    async fn start_child(
        &self,
        parent: &ExecutionId,
        seq: u32,
        workflow_name: &str,
        input: serde_json::Value,
    ) -> Result<(), CommandError> {
        self.get()
            .start_child(parent, seq, workflow_name, input)
            .await
            .map_err(|e| match e {
                EngineError::Store(e) => CommandError::Store(e),
                other => CommandError::Store(crate::store::StoreError::Database(other.to_string())),
            })
    }
}

#[async_trait]
impl TaskServices for EngineHandle {
    async fn send_signal(
        &self,
        target: SignalTarget,
        signal_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        TaskServices::send_signal(self.get(), target, signal_id, payload).await
    }

    async fn emit_events(&self, events: Vec<EmittedEvent>) -> Result<(), EngineError> {
        TaskServices::emit_events(self.get(), events).await
    }

    async fn start_child_workflow(
        &self,
        workflow_name: &str,
        execution_name: &str,
        input: serde_json::Value,
    ) -> Result<ExecutionId, EngineError> {
        TaskServices::start_child_workflow(self.get(), workflow_name, execution_name, input).await
    }

    async fn send_heartbeat(&self, claim_id: uuid::Uuid) -> Result<bool, EngineError> {
        TaskServices::send_heartbeat(self.get(), claim_id).await
    }
}
