use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{encode_task_token, EngineError};
use crate::model::{ExecutionId, SignalTarget};

/// The bounded service surface a task handler is given for talking back
/// to the engine — sending signals, emitting events, starting child
/// workflows — without handing it the whole `Engine`.
#[async_trait]
pub trait TaskServices: Send + Sync + 'static {
    async fn send_signal(
        &self,
        target: SignalTarget,
        signal_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), EngineError>;

    async fn emit_events(&self, events: Vec<crate::model::EmittedEvent>) -> Result<(), EngineError>;

    async fn start_child_workflow(
        &self,
        workflow_name: &str,
        execution_name: &str,
        input: serde_json::Value,
    ) -> Result<ExecutionId, EngineError>;

    async fn send_heartbeat(&self, claim_id: uuid::Uuid) -> Result<bool, EngineError>;
}

/// Handed to a task handler invocation. Exposes the claim's identity,
/// retry bookkeeping, cooperative cancellation, and the bounded service
/// client described in §4.4 step 4.
#[derive(Clone)]
pub struct TaskContext {
    pub execution_id: ExecutionId,
    pub seq: u32,
    pub retry: u32,
    pub max_attempts: u32,
    claim_id: uuid::Uuid,
    cancellation: CancellationToken,
    services: Arc<dyn TaskServices>,
}

impl TaskContext {
    pub fn new(
        execution_id: ExecutionId,
        seq: u32,
        retry: u32,
        max_attempts: u32,
        claim_id: uuid::Uuid,
        cancellation: CancellationToken,
        services: Arc<dyn TaskServices>,
    ) -> Self {
        Self {
            execution_id,
            seq,
            retry,
            max_attempts,
            claim_id,
            cancellation,
            services,
        }
    }

    pub fn task_token(&self) -> String {
        encode_task_token(&self.execution_id, self.seq)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Records liveness on the claim row. Returns `true` if the Task
    /// Worker should cooperatively cancel (e.g. the execution already
    /// timed out).
    pub async fn heartbeat(&self) -> Result<bool, EngineError> {
        self.services.send_heartbeat(self.claim_id).await
    }

    pub async fn send_signal(
        &self,
        target: SignalTarget,
        signal_id: &str,
        payload: impl serde::Serialize + Send,
    ) -> Result<(), EngineError> {
        let payload = serde_json::to_value(payload).map_err(EngineError::Serialization)?;
        self.services.send_signal(target, signal_id, payload).await
    }

    pub async fn emit_events(&self, events: Vec<crate::model::EmittedEvent>) -> Result<(), EngineError> {
        self.services.emit_events(events).await
    }

    pub async fn start_child_workflow(
        &self,
        workflow_name: &str,
        execution_name: &str,
        input: impl serde::Serialize + Send,
    ) -> Result<ExecutionId, EngineError> {
        let input = serde_json::to_value(input).map_err(EngineError::Serialization)?;
        self.services
            .start_child_workflow(workflow_name, execution_name, input)
            .await
    }
}
