use std::fmt;

use crate::model::ExecutionError;

/// Error returned by a workflow's `run` function. Carries a stable
/// `code` (used as `Execution.error`) separately from the human
/// `message`, mirroring the inherited crate's workflow error shape.
#[derive(Debug, Clone)]
pub struct WorkflowError {
    pub message: String,
    pub code: Option<String>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn into_execution_error(self) -> ExecutionError {
        ExecutionError::new(self.code.unwrap_or_else(|| "WorkflowError".to_string()), self.message)
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<ExecutionError> for WorkflowError {
    fn from(e: ExecutionError) -> Self {
        Self {
            message: e.message,
            code: Some(e.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_preserves_code_and_message() {
        let exec_err = ExecutionError::new("TaskFailed", "boom");
        let wf_err: WorkflowError = exec_err.into();
        assert_eq!(wf_err.code.as_deref(), Some("TaskFailed"));
        assert_eq!(wf_err.message, "boom");
    }
}
