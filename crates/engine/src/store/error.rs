use uuid::Uuid;

use crate::model::ExecutionId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("execution already exists: {0}")]
    ExecutionAlreadyExists(ExecutionId),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("optimistic concurrency conflict: expected sequence {expected}, actual {actual}")]
    ConcurrencyConflict { expected: usize, actual: usize },

    #[error("execution '{0}' is not in progress, status transition rejected")]
    NotInProgress(ExecutionId),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
