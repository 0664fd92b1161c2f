use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EmittedEvent;
use crate::reliability::{CircuitBreakerConfig, RetryPolicy};

/// Options attached to a `StartTask` command, mirroring the retry /
/// timeout / circuit-breaker knobs a task dispatch needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    pub retry_policy: RetryPolicy,
    pub schedule_to_start_timeout: Option<Duration>,
    pub start_to_close_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub priority: i32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            schedule_to_start_timeout: None,
            start_to_close_timeout: None,
            heartbeat_timeout: None,
            circuit_breaker: None,
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Entity,
    Bucket,
    Search,
}

/// Uniform request payload for `EntityOp` / `BucketOp` / `SearchOp`.
///
/// The functional spec does not differentiate the scheduling or
/// correspondence rules of these three operation families from each
/// other — they only differ in which store backend ultimately serves
/// them — so they share one command/event shape tagged by
/// [`StoreKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOperation {
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum TimerDue {
    Absolute(DateTime<Utc>),
    Relative(Duration),
}

#[derive(Debug, Clone)]
pub enum SignalTarget {
    /// An explicit execution id.
    Execution(String),
    /// `(parentExecutionId, seq)` — resolved to the child execution
    /// spawned by that command.
    Child { parent: String, seq: u32 },
}

/// Internal, non-persisted intent produced by the workflow executor.
/// Each variant carries the `seq` assigned when the workflow requested
/// it; the Command Executor turns it into a side effect plus the
/// corresponding `Scheduled` history event.
#[derive(Debug, Clone)]
pub enum WorkflowCommand {
    StartTask {
        seq: u32,
        name: String,
        input: serde_json::Value,
        options: TaskOptions,
    },
    StartTimer {
        seq: u32,
        due: TimerDue,
    },
    StartChildWorkflow {
        seq: u32,
        name: String,
        input: serde_json::Value,
    },
    SendSignal {
        seq: u32,
        target: SignalTarget,
        signal_id: String,
        payload: serde_json::Value,
        id: Option<String>,
    },
    EmitEvents {
        seq: u32,
        events: Vec<EmittedEvent>,
    },
    ExpectSignal {
        seq: u32,
        signal_id: String,
        timeout: Option<Duration>,
    },
    StartCondition {
        seq: u32,
        timeout: Option<Duration>,
    },
    InvokeTransaction {
        seq: u32,
        name: String,
        input: serde_json::Value,
    },
    StoreOp {
        seq: u32,
        kind: StoreKind,
        op: StoreOperation,
    },
}

impl WorkflowCommand {
    pub fn seq(&self) -> u32 {
        match self {
            WorkflowCommand::StartTask { seq, .. }
            | WorkflowCommand::StartTimer { seq, .. }
            | WorkflowCommand::StartChildWorkflow { seq, .. }
            | WorkflowCommand::SendSignal { seq, .. }
            | WorkflowCommand::EmitEvents { seq, .. }
            | WorkflowCommand::ExpectSignal { seq, .. }
            | WorkflowCommand::StartCondition { seq, .. }
            | WorkflowCommand::InvokeTransaction { seq, .. }
            | WorkflowCommand::StoreOp { seq, .. } => *seq,
        }
    }
}
