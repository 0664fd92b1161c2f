use thiserror::Error;

use crate::model::ExecutionError;

/// Error raised by task handler code. `retryable=false` short-circuits
/// the configured retry policy and fails the task immediately.
#[derive(Debug, Clone, Error)]
#[error("{error}: {message}")]
pub struct TaskError {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn task_not_found(name: &str) -> Self {
        Self::non_retryable("TaskNotFound", format!("no task registered under name '{name}'"))
    }
}

impl From<TaskError> for ExecutionError {
    fn from(e: TaskError) -> Self {
        ExecutionError::new(e.error, e.message)
    }
}
