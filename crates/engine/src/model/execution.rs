use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `workflowName "/" executionName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(workflow_name: &str, execution_name: &str) -> Self {
        Self(format!("{workflow_name}/{execution_name}"))
    }

    /// Deterministic child execution name derived from a parent execution
    /// and the `seq` of the `StartChildWorkflow` command that spawned it.
    pub fn child(parent: &ExecutionId, seq: u32) -> String {
        format!("{}#{}", parent.0, seq)
    }

    pub fn workflow_name(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::InProgress)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub execution_id: ExecutionId,
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub error: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new("Timeout", "execution exceeded its configured timeout")
    }

    pub fn determinism(detail: impl Into<String>) -> Self {
        Self::new("DeterminismError", detail.into())
    }

    pub fn workflow_not_found(workflow_name: &str) -> Self {
        Self::new(
            "WorkflowNotFound",
            format!("no workflow registered under name '{workflow_name}'"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_name: String,
    pub input: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<ExecutionError>,
    pub parent: Option<ParentRef>,
    pub input_hash: String,
    pub timeout_time: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(
        id: ExecutionId,
        workflow_name: impl Into<String>,
        input: serde_json::Value,
        start_time: DateTime<Utc>,
        parent: Option<ParentRef>,
        timeout_time: Option<DateTime<Utc>>,
    ) -> Self {
        let input_hash = hash_input(&input);
        Self {
            id,
            workflow_name: workflow_name.into(),
            input,
            start_time,
            end_time: None,
            status: ExecutionStatus::InProgress,
            result: None,
            error: None,
            parent,
            input_hash,
            timeout_time,
        }
    }
}

/// Non-cryptographic content hash used purely for idempotency matching
/// on `StartExecution` retries (`§6`: same name + different hash is a
/// conflict, same name + same hash is a no-op).
pub fn hash_input(input: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(input).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
