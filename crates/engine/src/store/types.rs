use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ExecutionId, ExecutionStatus, TaskOptions};

#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub workflow_name: Option<String>,
}

/// One workflow-task queue message: a batch of events addressed to a
/// single execution, as delivered by the [`crate::store::ExecutionQueue`].
#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub execution_id: ExecutionId,
    pub events: Vec<crate::model::HistoryEvent>,
}

/// A task dispatch request, handed to [`crate::store::TaskQueueStore::enqueue`].
#[derive(Debug, Clone)]
pub struct TaskDispatch {
    pub execution_id: ExecutionId,
    pub seq: u32,
    pub name: String,
    pub input: serde_json::Value,
    pub options: TaskOptions,
}

/// A claimed task handed to the Task Worker, keyed by
/// `(executionId, seq, retry)` per the data model.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub claim_id: Uuid,
    pub execution_id: ExecutionId,
    pub seq: u32,
    pub retry: u32,
    pub name: String,
    pub input: serde_json::Value,
    pub options: TaskOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFailureOutcome {
    WillRetry { next_retry: u32, delay: Duration },
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    pub should_cancel: bool,
}

/// A pending timer, held by [`crate::store::TimerStore`].
#[derive(Debug, Clone)]
pub struct TimerRow {
    pub schedule_id: Uuid,
    pub execution_id: ExecutionId,
    pub due_time: DateTime<Utc>,
    pub payload: TimerPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TimerPayload {
    /// Fires by submitting `event` to the target execution's queue.
    ScheduleEvent { event: crate::model::HistoryEvent },
    /// Fires a `TaskHeartbeatTimedOut{seq}` if no heartbeat has been
    /// recorded on the claim row within the window.
    HeartbeatMonitor {
        seq: u32,
        claim_id: Uuid,
        heartbeat_timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub seq: u32,
    pub name: String,
    pub input: serde_json::Value,
    pub attempts: u32,
    pub error_history: Vec<String>,
    pub dead_at: DateTime<Utc>,
}
