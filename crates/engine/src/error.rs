//! Crate-level error aggregation.
//!
//! Individual components (store, workflow executor, orchestrator,
//! task worker, signal router, transaction executor) define their own
//! typed error enum. [`EngineError`] sits above all of them at the
//! `Engine` service-API boundary so callers of that boundary have a
//! single error type to match on, the way the inherited executor
//! layers its `ExecutorError` above `StoreError`.

use uuid::Uuid;

use crate::model::ExecutionId;
use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;
use crate::transaction::TransactionError;
use crate::worker::WorkerError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("task worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("execution '{execution_id}' already running with a different input (hash {existing_hash} != {requested_hash})")]
    InputConflict {
        execution_id: ExecutionId,
        existing_hash: String,
        requested_hash: String,
    },

    #[error("invalid task token")]
    InvalidTaskToken,

    #[error("unknown task token referencing execution {0} seq {1}")]
    UnknownTaskToken(ExecutionId, u32),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque `(executionId, seq)` encoding handed to task handlers that
/// return the async sentinel, per §7's `SendTaskSuccess|Failure(token)`
/// contract. Round-trips through a plain base64-free string so it can
/// be logged without leaking structure beyond what it already is.
pub fn encode_task_token(execution_id: &ExecutionId, seq: u32) -> String {
    format!("{}:{}", execution_id.0, seq)
}

pub fn decode_task_token(token: &str) -> Result<(ExecutionId, u32), EngineError> {
    let (execution_id, seq) = token.rsplit_once(':').ok_or(EngineError::InvalidTaskToken)?;
    let seq: u32 = seq.parse().map_err(|_| EngineError::InvalidTaskToken)?;
    Ok((ExecutionId(execution_id.to_string()), seq))
}

/// Tags a randomly generated attempt/claim id; kept here since several
/// components mint one (task claims, transaction attempts).
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}
