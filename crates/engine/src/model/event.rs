use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::StoreKind;

/// A fan-out message emitted by a workflow, dispatched to subscribers
/// whose filter matches `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// One entry in an execution's history log.
///
/// Every variant carries either a `seq` (assigned deterministically by
/// the workflow executor at request time, for events tied to a
/// workflow command) or a client/engine-supplied `id` (for events that
/// are not the result of a workflow-issued command, such as a
/// fire-and-forget signal). History is a *set* keyed by
/// [`HistoryEvent::event_id`] — re-delivering the same event is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    // -- Lifecycle --------------------------------------------------
    WorkflowStarted {
        input: serde_json::Value,
        timeout_time: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    WorkflowRunStarted {
        run: u32,
        timestamp: DateTime<Utc>,
    },
    WorkflowRunCompleted {
        run: u32,
        timestamp: DateTime<Utc>,
    },
    WorkflowSucceeded {
        output: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowTimedOut {
        timestamp: DateTime<Utc>,
    },

    // -- Scheduled ----------------------------------------------------
    TaskScheduled {
        seq: u32,
        name: String,
        input: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    TimerScheduled {
        seq: u32,
        until_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    ChildWorkflowScheduled {
        seq: u32,
        name: String,
        input: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    SignalSent {
        seq: u32,
        execution_id: String,
        signal_id: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    EventsEmitted {
        seq: u32,
        events: Vec<EmittedEvent>,
        timestamp: DateTime<Utc>,
    },
    SignalExpectStarted {
        seq: u32,
        signal_id: String,
        timeout_time: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    ConditionStarted {
        seq: u32,
        timeout_time: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    StoreRequest {
        seq: u32,
        kind: StoreKind,
        op: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    TransactionRequest {
        seq: u32,
        name: String,
        input: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    // -- Result -------------------------------------------------------
    TaskSucceeded {
        seq: u32,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        seq: u32,
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    TaskHeartbeatTimedOut {
        seq: u32,
        timestamp: DateTime<Utc>,
    },
    TimerCompleted {
        seq: u32,
        timestamp: DateTime<Utc>,
    },
    ChildWorkflowSucceeded {
        seq: u32,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    ChildWorkflowFailed {
        seq: u32,
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Either the result of an `ExpectSignal` (`seq` set) or a
    /// fire-and-forget signal delivered without a prior command
    /// (`seq` absent, identity carried by `id`).
    SignalReceived {
        seq: Option<u32>,
        id: String,
        signal_id: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    SignalTimedOut {
        seq: u32,
        signal_id: String,
        timestamp: DateTime<Utc>,
    },
    ConditionTimedOut {
        seq: u32,
        timestamp: DateTime<Utc>,
    },
    StoreRequestSucceeded {
        seq: u32,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    StoreRequestFailed {
        seq: u32,
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    TransactionRequestSucceeded {
        seq: u32,
        output: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    TransactionRequestFailed {
        seq: u32,
        error: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl HistoryEvent {
    /// The `seq` this event is tied to, if it belongs to the
    /// scheduled/result correspondence system.
    pub fn seq(&self) -> Option<u32> {
        use HistoryEvent::*;
        match self {
            TaskScheduled { seq, .. }
            | TimerScheduled { seq, .. }
            | ChildWorkflowScheduled { seq, .. }
            | SignalSent { seq, .. }
            | EventsEmitted { seq, .. }
            | SignalExpectStarted { seq, .. }
            | ConditionStarted { seq, .. }
            | StoreRequest { seq, .. }
            | TransactionRequest { seq, .. }
            | TaskSucceeded { seq, .. }
            | TaskFailed { seq, .. }
            | TaskHeartbeatTimedOut { seq, .. }
            | TimerCompleted { seq, .. }
            | ChildWorkflowSucceeded { seq, .. }
            | ChildWorkflowFailed { seq, .. }
            | SignalTimedOut { seq, .. }
            | ConditionTimedOut { seq, .. }
            | StoreRequestSucceeded { seq, .. }
            | StoreRequestFailed { seq, .. }
            | TransactionRequestSucceeded { seq, .. }
            | TransactionRequestFailed { seq, .. } => Some(*seq),
            SignalReceived { seq, .. } => *seq,
            WorkflowStarted { .. }
            | WorkflowRunStarted { .. }
            | WorkflowRunCompleted { .. }
            | WorkflowSucceeded { .. }
            | WorkflowFailed { .. }
            | WorkflowTimedOut { .. } => None,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        use HistoryEvent::*;
        matches!(
            self,
            TaskScheduled { .. }
                | TimerScheduled { .. }
                | ChildWorkflowScheduled { .. }
                | SignalSent { .. }
                | EventsEmitted { .. }
                | SignalExpectStarted { .. }
                | ConditionStarted { .. }
                | StoreRequest { .. }
                | TransactionRequest { .. }
        )
    }

    pub fn is_result(&self) -> bool {
        use HistoryEvent::*;
        matches!(
            self,
            TaskSucceeded { .. }
                | TaskFailed { .. }
                | TaskHeartbeatTimedOut { .. }
                | TimerCompleted { .. }
                | ChildWorkflowSucceeded { .. }
                | ChildWorkflowFailed { .. }
                | SignalReceived { .. }
                | SignalTimedOut { .. }
                | ConditionTimedOut { .. }
                | StoreRequestSucceeded { .. }
                | StoreRequestFailed { .. }
                | TransactionRequestSucceeded { .. }
                | TransactionRequestFailed { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::WorkflowSucceeded { .. }
                | HistoryEvent::WorkflowFailed { .. }
                | HistoryEvent::WorkflowTimedOut { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        use HistoryEvent::*;
        match self {
            WorkflowStarted { .. } => "workflow_started",
            WorkflowRunStarted { .. } => "workflow_run_started",
            WorkflowRunCompleted { .. } => "workflow_run_completed",
            WorkflowSucceeded { .. } => "workflow_succeeded",
            WorkflowFailed { .. } => "workflow_failed",
            WorkflowTimedOut { .. } => "workflow_timed_out",
            TaskScheduled { .. } => "task_scheduled",
            TimerScheduled { .. } => "timer_scheduled",
            ChildWorkflowScheduled { .. } => "child_workflow_scheduled",
            SignalSent { .. } => "signal_sent",
            EventsEmitted { .. } => "events_emitted",
            SignalExpectStarted { .. } => "signal_expect_started",
            ConditionStarted { .. } => "condition_started",
            StoreRequest { .. } => "store_request",
            TransactionRequest { .. } => "transaction_request",
            TaskSucceeded { .. } => "task_succeeded",
            TaskFailed { .. } => "task_failed",
            TaskHeartbeatTimedOut { .. } => "task_heartbeat_timed_out",
            TimerCompleted { .. } => "timer_completed",
            ChildWorkflowSucceeded { .. } => "child_workflow_succeeded",
            ChildWorkflowFailed { .. } => "child_workflow_failed",
            SignalReceived { .. } => "signal_received",
            SignalTimedOut { .. } => "signal_timed_out",
            ConditionTimedOut { .. } => "condition_timed_out",
            StoreRequestSucceeded { .. } => "store_request_succeeded",
            StoreRequestFailed { .. } => "store_request_failed",
            TransactionRequestSucceeded { .. } => "transaction_request_succeeded",
            TransactionRequestFailed { .. } => "transaction_request_failed",
        }
    }

    /// `seq+"_"+type` for sequenced events; the carried `id` for
    /// fire-and-forget signals; a fixed identifier for the singleton
    /// lifecycle events. Used as the set-identity for idempotent replay.
    pub fn event_id(&self) -> String {
        if let Some(seq) = self.seq() {
            return format!("{seq}_{}", self.type_name());
        }
        match self {
            HistoryEvent::SignalReceived { id, .. } => format!("signal_{id}"),
            HistoryEvent::WorkflowRunStarted { run, .. } => format!("run_started_{run}"),
            HistoryEvent::WorkflowRunCompleted { run, .. } => format!("run_completed_{run}"),
            _ => self.type_name().to_string(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use HistoryEvent::*;
        match self {
            WorkflowStarted { timestamp, .. }
            | WorkflowRunStarted { timestamp, .. }
            | WorkflowRunCompleted { timestamp, .. }
            | WorkflowSucceeded { timestamp, .. }
            | WorkflowFailed { timestamp, .. }
            | WorkflowTimedOut { timestamp, .. }
            | TaskScheduled { timestamp, .. }
            | TimerScheduled { timestamp, .. }
            | ChildWorkflowScheduled { timestamp, .. }
            | SignalSent { timestamp, .. }
            | EventsEmitted { timestamp, .. }
            | SignalExpectStarted { timestamp, .. }
            | ConditionStarted { timestamp, .. }
            | StoreRequest { timestamp, .. }
            | TransactionRequest { timestamp, .. }
            | TaskSucceeded { timestamp, .. }
            | TaskFailed { timestamp, .. }
            | TaskHeartbeatTimedOut { timestamp, .. }
            | TimerCompleted { timestamp, .. }
            | ChildWorkflowSucceeded { timestamp, .. }
            | ChildWorkflowFailed { timestamp, .. }
            | SignalReceived { timestamp, .. }
            | SignalTimedOut { timestamp, .. }
            | ConditionTimedOut { timestamp, .. }
            | StoreRequestSucceeded { timestamp, .. }
            | StoreRequestFailed { timestamp, .. }
            | TransactionRequestSucceeded { timestamp, .. }
            | TransactionRequestFailed { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_seq_and_type_for_scheduled_events() {
        let e = HistoryEvent::TaskScheduled {
            seq: 3,
            name: "hello".into(),
            input: serde_json::json!(null),
            timestamp: Utc::now(),
        };
        assert_eq!(e.event_id(), "3_task_scheduled");
    }

    #[test]
    fn fire_and_forget_signal_uses_client_id() {
        let e = HistoryEvent::SignalReceived {
            seq: None,
            id: "abc".into(),
            signal_id: "go".into(),
            payload: serde_json::json!(null),
            timestamp: Utc::now(),
        };
        assert_eq!(e.event_id(), "signal_abc");
        assert!(e.is_result());
    }
}
