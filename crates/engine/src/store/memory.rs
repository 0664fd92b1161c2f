//! In-memory store implementations, useful for tests and single-process
//! deployments. Mirrors the shape of [`super::postgres::PostgresStore`]
//! so behavior differences are easy to spot.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{Execution, ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent};

use super::dead_letter::{DeadLetterSink, TaskDispatchForRequeue};
use super::entity::{EntityStore, EntityWrite, VersionedValue};
use super::error::StoreError;
use super::execution::ExecutionStore;
use super::history::HistoryStore;
use super::queue::ExecutionQueue;
use super::task_queue::TaskQueueStore;
use super::timer_store::TimerStore;
use super::types::{
    ClaimedTask, DeadLetterEntry, ExecutionFilter, HeartbeatResponse, Pagination, TaskDispatch,
    TaskFailureOutcome, TimerRow, WorkflowTask,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskState {
    Pending,
    Claimed,
    Done,
}

struct TaskRecord {
    dispatch: TaskDispatch,
    retry: u32,
    claim_id: Uuid,
    claimed_by: Option<String>,
    state: TaskState,
    error_history: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    history: RwLock<HashMap<ExecutionId, Vec<HistoryEvent>>>,
    ready_order: RwLock<VecDeque<ExecutionId>>,
    pending_events: RwLock<HashMap<ExecutionId, Vec<HistoryEvent>>>,
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    timers: RwLock<HashMap<Uuid, TimerRow>>,
    dlq: RwLock<HashMap<Uuid, DeadLetterEntry>>,
    entities: RwLock<HashMap<String, (serde_json::Value, u64)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/inspection helper: number of executions ever created.
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn append(
        &self,
        execution_id: &ExecutionId,
        expected_len: usize,
        events: Vec<HistoryEvent>,
    ) -> Result<usize, StoreError> {
        let mut history = self.history.write();
        let log = history.entry(execution_id.clone()).or_default();
        if log.len() != expected_len {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_len,
                actual: log.len(),
            });
        }
        log.extend(events);
        Ok(log.len())
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryEvent>, StoreError> {
        Ok(self
            .history
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create(&self, execution: Execution) -> Result<bool, StoreError> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.id) {
            return Ok(false);
        }
        executions.insert(execution.id.clone(), execution);
        Ok(true)
    }

    async fn get(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn list(
        &self,
        filter: ExecutionFilter,
        page: Pagination,
    ) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read();
        let mut matched: Vec<Execution> = executions
            .values()
            .filter(|e| {
                filter
                    .status
                    .map(|s| s == e.status || (s.is_terminal() && e.status.is_terminal()))
                    .unwrap_or(true)
                    && filter
                        .workflow_name
                        .as_ref()
                        .map(|n| n == &e.workflow_name)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.start_time);
        let limit = if page.limit == 0 { matched.len() } else { page.limit };
        Ok(matched.into_iter().skip(page.offset).take(limit).collect())
    }

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<ExecutionError>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;

        if execution.status.is_terminal() {
            return Err(StoreError::NotInProgress(execution_id.clone()));
        }

        execution.status = status;
        execution.result = result;
        execution.error = error;
        execution.end_time = Some(end_time);
        Ok(())
    }
}

#[async_trait]
impl ExecutionQueue for InMemoryStore {
    async fn enqueue(
        &self,
        execution_id: &ExecutionId,
        events: Vec<HistoryEvent>,
    ) -> Result<(), StoreError> {
        let mut pending = self.pending_events.write();
        let was_empty = pending.get(execution_id).map(|v| v.is_empty()).unwrap_or(true);
        pending.entry(execution_id.clone()).or_default().extend(events);
        if was_empty {
            self.ready_order.write().push_back(execution_id.clone());
        }
        Ok(())
    }

    async fn dequeue_batch(&self, max: usize) -> Result<Vec<WorkflowTask>, StoreError> {
        let mut order = self.ready_order.write();
        let mut pending = self.pending_events.write();
        let mut out = Vec::new();
        while out.len() < max {
            let Some(execution_id) = order.pop_front() else {
                break;
            };
            let events = pending.remove(&execution_id).unwrap_or_default();
            if !events.is_empty() {
                out.push(WorkflowTask { execution_id, events });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TaskQueueStore for InMemoryStore {
    async fn enqueue(&self, task: TaskDispatch) -> Result<Uuid, StoreError> {
        let claim_id = Uuid::now_v7();
        self.tasks.write().insert(
            claim_id,
            TaskRecord {
                dispatch: task,
                retry: 0,
                claim_id,
                claimed_by: None,
                state: TaskState::Pending,
                error_history: vec![],
            },
        );
        Ok(claim_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        task_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let mut tasks = self.tasks.write();
        let mut claimed = Vec::new();
        for record in tasks.values_mut() {
            if claimed.len() >= max_tasks {
                break;
            }
            if record.state == TaskState::Pending
                && (task_names.is_empty() || task_names.contains(&record.dispatch.name))
            {
                record.state = TaskState::Claimed;
                record.claimed_by = Some(worker_id.to_string());
                claimed.push(ClaimedTask {
                    claim_id: record.claim_id,
                    execution_id: record.dispatch.execution_id.clone(),
                    seq: record.dispatch.seq,
                    retry: record.retry,
                    name: record.dispatch.name.clone(),
                    input: record.dispatch.input.clone(),
                    options: record.dispatch.options.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn heartbeat(
        &self,
        claim_id: Uuid,
        worker_id: &str,
    ) -> Result<HeartbeatResponse, StoreError> {
        let tasks = self.tasks.read();
        match tasks.get(&claim_id) {
            Some(record)
                if record.state == TaskState::Claimed
                    && record.claimed_by.as_deref() == Some(worker_id) =>
            {
                Ok(HeartbeatResponse {
                    accepted: true,
                    should_cancel: false,
                })
            }
            _ => Ok(HeartbeatResponse {
                accepted: false,
                should_cancel: true,
            }),
        }
    }

    async fn complete(&self, claim_id: Uuid) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let record = tasks
            .get_mut(&claim_id)
            .ok_or(StoreError::TaskNotFound(claim_id))?;
        record.state = TaskState::Done;
        Ok(())
    }

    async fn fail(&self, claim_id: Uuid, error: &str) -> Result<TaskFailureOutcome, StoreError> {
        let mut tasks = self.tasks.write();
        let record = tasks
            .get_mut(&claim_id)
            .ok_or(StoreError::TaskNotFound(claim_id))?;

        record.error_history.push(error.to_string());
        let max_attempts = record.dispatch.options.retry_policy.max_attempts;
        if record.retry + 1 < max_attempts {
            record.retry += 1;
            record.state = TaskState::Pending;
            record.claimed_by = None;
            let delay = record
                .dispatch
                .options
                .retry_policy
                .delay_for_attempt(record.retry + 1);
            Ok(TaskFailureOutcome::WillRetry {
                next_retry: record.retry,
                delay,
            })
        } else {
            record.state = TaskState::Done;
            Ok(TaskFailureOutcome::Exhausted)
        }
    }

    async fn reclaim_stale(&self, _stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        // The in-memory store does not track wall-clock claim age;
        // reclamation is a no-op here and exercised against the
        // Postgres-backed store instead.
        Ok(vec![])
    }
}

#[async_trait]
impl TimerStore for InMemoryStore {
    async fn schedule(&self, row: TimerRow) -> Result<(), StoreError> {
        self.timers.write().insert(row.schedule_id, row);
        Ok(())
    }

    async fn cancel(&self, schedule_id: Uuid) -> Result<(), StoreError> {
        self.timers.write().remove(&schedule_id);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<TimerRow>, StoreError> {
        let mut timers = self.timers.write();
        let due_ids: Vec<Uuid> = timers
            .values()
            .filter(|row| row.due_time <= now)
            .map(|row| row.schedule_id)
            .collect();
        Ok(due_ids
            .into_iter()
            .filter_map(|id| timers.remove(&id))
            .collect())
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryStore {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), StoreError> {
        self.dlq.write().insert(entry.id, entry);
        Ok(())
    }

    async fn list(
        &self,
        execution_id: Option<ExecutionId>,
        page: Pagination,
    ) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let dlq = self.dlq.read();
        let mut matched: Vec<DeadLetterEntry> = dlq
            .values()
            .filter(|e| {
                execution_id
                    .as_ref()
                    .map(|id| id == &e.execution_id)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.dead_at);
        let limit = if page.limit == 0 { matched.len() } else { page.limit };
        Ok(matched.into_iter().skip(page.offset).take(limit).collect())
    }

    async fn requeue(&self, id: Uuid) -> Result<TaskDispatchForRequeue, StoreError> {
        let mut dlq = self.dlq.write();
        let entry = dlq.remove(&id).ok_or(StoreError::TaskNotFound(id))?;
        Ok(TaskDispatchForRequeue {
            execution_id: entry.execution_id,
            seq: entry.seq,
            name: entry.name,
            input: entry.input,
        })
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        Ok(self
            .entities
            .read()
            .get(key)
            .map(|(value, version)| VersionedValue {
                value: value.clone(),
                version: *version,
            }))
    }

    async fn commit_if_unchanged(
        &self,
        reads: &[(String, u64)],
        writes: &[EntityWrite],
    ) -> Result<bool, StoreError> {
        let mut entities = self.entities.write();
        for (key, expected_version) in reads {
            let actual_version = entities.get(key).map(|(_, v)| *v).unwrap_or(0);
            if actual_version != *expected_version {
                return Ok(false);
            }
        }
        for write in writes {
            let actual_version = entities.get(write.key()).map(|(_, v)| *v).unwrap_or(0);
            let expected_version = reads
                .iter()
                .find(|(k, _)| k == write.key())
                .map(|(_, v)| *v)
                .unwrap_or(0);
            if actual_version != expected_version {
                return Ok(false);
            }
        }
        for write in writes {
            match write {
                EntityWrite::Set { key, value } => {
                    let next_version = entities.get(key).map(|(_, v)| v + 1).unwrap_or(1);
                    entities.insert(key.clone(), (value.clone(), next_version));
                }
                EntityWrite::Delete { key } => {
                    entities.remove(key);
                }
            }
        }
        Ok(true)
    }
}
