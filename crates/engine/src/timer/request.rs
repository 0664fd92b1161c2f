use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{ExecutionId, HistoryEvent};

/// Request accepted by [`super::TimerService::start_timer`] (§4.5).
#[derive(Debug, Clone)]
pub enum TimerRequest {
    /// Delivers `event` to `execution_id`'s queue at `due`.
    ScheduleEvent {
        execution_id: ExecutionId,
        event: HistoryEvent,
        due: DateTime<Utc>,
    },
    /// Fires `TaskHeartbeatTimedOut{seq}` at `due_at` unless the Task
    /// Worker has already cancelled or rescheduled this monitor in
    /// response to a fresh heartbeat.
    HeartbeatMonitor {
        execution_id: ExecutionId,
        seq: u32,
        claim_id: Uuid,
        heartbeat_timeout: Duration,
        due_at: DateTime<Utc>,
    },
}

impl TimerRequest {
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            TimerRequest::ScheduleEvent { execution_id, .. } => execution_id,
            TimerRequest::HeartbeatMonitor { execution_id, .. } => execution_id,
        }
    }

    pub fn due(&self) -> DateTime<Utc> {
        match self {
            TimerRequest::ScheduleEvent { due, .. } => *due,
            TimerRequest::HeartbeatMonitor { due_at, .. } => *due_at,
        }
    }
}
