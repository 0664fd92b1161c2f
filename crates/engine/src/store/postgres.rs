//! PostgreSQL-backed store implementations.
//!
//! Uses a single connection pool for all five store interfaces, the
//! way the inherited crate backs its monolithic `WorkflowEventStore`
//! with one pool. Task claiming uses `FOR UPDATE SKIP LOCKED` for
//! contention-free concurrent workers; status transitions and history
//! appends use a row lock plus a compare against the expected
//! sequence number for optimistic concurrency.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::model::{Execution, ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent, TaskOptions};

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

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl HistoryStore for PostgresStore {
    #[instrument(skip(self, events))]
    async fn append(
        &self,
        execution_id: &ExecutionId,
        expected_len: usize,
        events: Vec<HistoryEvent>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as current_len
            FROM durable_history_events
            WHERE execution_id = $1
            FOR UPDATE
            "#,
        )
        .bind(&execution_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let current_len: i64 = row.get("current_len");
        if current_len as usize != expected_len {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_len,
                actual: current_len as usize,
            });
        }

        let mut position = current_len;
        for event in &events {
            let data = serde_json::to_value(event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO durable_history_events (execution_id, position, event_type, event_data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&execution_id.0)
            .bind(position)
            .bind(event.type_name())
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            position += 1;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(%execution_id, new_len = position, "appended history events");
        Ok(position as usize)
    }

    #[instrument(skip(self))]
    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_data FROM durable_history_events
            WHERE execution_id = $1
            ORDER BY position
            "#,
        )
        .bind(&execution_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("event_data");
                serde_json::from_value(data).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionStore for PostgresStore {
    #[instrument(skip(self, execution))]
    async fn create(&self, execution: Execution) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO durable_executions (
                id, workflow_name, input, start_time, status, input_hash,
                parent_execution_id, parent_seq, timeout_time
            )
            VALUES ($1, $2, $3, $4, 'in_progress', $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&execution.id.0)
        .bind(&execution.workflow_name)
        .bind(&execution.input)
        .bind(execution.start_time)
        .bind(&execution.input_hash)
        .bind(execution.parent.as_ref().map(|p| p.execution_id.0.clone()))
        .bind(execution.parent.as_ref().map(|p| p.seq as i32))
        .bind(execution.timeout_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_name, input, start_time, end_time, status, result, error,
                   input_hash, parent_execution_id, parent_seq, timeout_time
            FROM durable_executions WHERE id = $1
            "#,
        )
        .bind(&execution_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(row_to_execution).transpose()
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: ExecutionFilter,
        page: Pagination,
    ) -> Result<Vec<Execution>, StoreError> {
        let status = filter.status.map(|s| s.to_string());
        let limit = if page.limit == 0 { 100 } else { page.limit } as i64;
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_name, input, start_time, end_time, status, result, error,
                   input_hash, parent_execution_id, parent_seq, timeout_time
            FROM durable_executions
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR workflow_name = $2)
            ORDER BY start_time
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(&status)
        .bind(&filter.workflow_name)
        .bind(page.offset as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(row_to_execution).collect()
    }

    #[instrument(skip(self, result, error))]
    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<ExecutionError>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let error_json = error
            .map(|e| serde_json::to_value(e))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE durable_executions
            SET status = $2, result = $3, error = $4, end_time = $5
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(&execution_id.0)
        .bind(status.to_string())
        .bind(&result)
        .bind(&error_json)
        .bind(end_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotInProgress(execution_id.clone()));
        }
        Ok(())
    }
}

fn row_to_execution(row: sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "in_progress" => ExecutionStatus::InProgress,
        "succeeded" => ExecutionStatus::Succeeded,
        "failed" => ExecutionStatus::Failed,
        "timed_out" => ExecutionStatus::TimedOut,
        other => return Err(StoreError::Database(format!("unknown status '{other}'"))),
    };

    let error_json: Option<serde_json::Value> = row.get("error");
    let parent_execution_id: Option<String> = row.get("parent_execution_id");
    let parent_seq: Option<i32> = row.get("parent_seq");

    Ok(Execution {
        id: ExecutionId(row.get("id")),
        workflow_name: row.get("workflow_name"),
        input: row.get("input"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status,
        result: row.get("result"),
        error: error_json.and_then(|v| serde_json::from_value(v).ok()),
        parent: parent_execution_id.map(|id| crate::model::ParentRef {
            execution_id: ExecutionId(id),
            seq: parent_seq.unwrap_or(0) as u32,
        }),
        input_hash: row.get("input_hash"),
        timeout_time: row.get("timeout_time"),
    })
}

#[async_trait]
impl ExecutionQueue for PostgresStore {
    #[instrument(skip(self, events))]
    async fn enqueue(
        &self,
        execution_id: &ExecutionId,
        events: Vec<HistoryEvent>,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_value(&events)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO durable_execution_queue (id, execution_id, events, enqueued_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&execution_id.0)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn dequeue_batch(&self, max: usize) -> Result<Vec<WorkflowTask>, StoreError> {
        // One in-flight batch per execution: pick the oldest queued row
        // per distinct execution_id that is not already claimed.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT DISTINCT ON (execution_id) id, execution_id, events
                FROM durable_execution_queue
                ORDER BY execution_id, enqueued_at
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM durable_execution_queue
            WHERE id IN (SELECT id FROM claimable LIMIT $1)
            RETURNING execution_id, events
            "#,
        )
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let events_json: serde_json::Value = row.get("events");
                let events: Vec<HistoryEvent> = serde_json::from_value(events_json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(WorkflowTask {
                    execution_id: ExecutionId(row.get("execution_id")),
                    events,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskQueueStore for PostgresStore {
    #[instrument(skip(self, task))]
    async fn enqueue(&self, task: TaskDispatch) -> Result<Uuid, StoreError> {
        let claim_id = Uuid::now_v7();
        let options_json = serde_json::to_value(&task.options)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO durable_task_queue (
                claim_id, execution_id, seq, retry, name, input, options, status
            )
            VALUES ($1, $2, $3, 0, $4, $5, $6, 'pending')
            "#,
        )
        .bind(claim_id)
        .bind(&task.execution_id.0)
        .bind(task.seq as i32)
        .bind(&task.name)
        .bind(&task.input)
        .bind(&options_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(claim_id)
    }

    #[instrument(skip(self, task_names))]
    async fn claim(
        &self,
        worker_id: &str,
        task_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        if task_names.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT claim_id
                FROM durable_task_queue
                WHERE status = 'pending' AND name = ANY($1)
                ORDER BY claim_id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE durable_task_queue t
            SET status = 'claimed', claimed_by = $3, claimed_at = NOW(), heartbeat_at = NOW()
            FROM claimable c
            WHERE t.claim_id = c.claim_id
            RETURNING t.claim_id, t.execution_id, t.seq, t.retry, t.name, t.input, t.options
            "#,
        )
        .bind(task_names)
        .bind(max_tasks as i64)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let options_json: serde_json::Value = row.get("options");
                let options: TaskOptions = serde_json::from_value(options_json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(ClaimedTask {
                    claim_id: row.get("claim_id"),
                    execution_id: ExecutionId(row.get("execution_id")),
                    seq: row.get::<i32, _>("seq") as u32,
                    retry: row.get::<i32, _>("retry") as u32,
                    name: row.get("name"),
                    input: row.get("input"),
                    options,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn heartbeat(
        &self,
        claim_id: Uuid,
        worker_id: &str,
    ) -> Result<HeartbeatResponse, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_task_queue
            SET heartbeat_at = NOW()
            WHERE claim_id = $1 AND claimed_by = $2 AND status = 'claimed'
            "#,
        )
        .bind(claim_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            Ok(HeartbeatResponse {
                accepted: true,
                should_cancel: false,
            })
        } else {
            Ok(HeartbeatResponse {
                accepted: false,
                should_cancel: true,
            })
        }
    }

    #[instrument(skip(self))]
    async fn complete(&self, claim_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE durable_task_queue SET status = 'completed' WHERE claim_id = $1")
            .bind(claim_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail(&self, claim_id: Uuid, error: &str) -> Result<TaskFailureOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT retry, options, error_history FROM durable_task_queue
            WHERE claim_id = $1 FOR UPDATE
            "#,
        )
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::TaskNotFound(claim_id))?;

        let retry: i32 = row.get("retry");
        let options_json: serde_json::Value = row.get("options");
        let options: TaskOptions =
            serde_json::from_value(options_json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut error_history: Vec<String> = row
            .get::<Option<serde_json::Value>, _>("error_history")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        error_history.push(error.to_string());
        let error_history_json = serde_json::to_value(&error_history).unwrap();

        if (retry as u32) + 1 < options.retry_policy.max_attempts {
            let next_retry = retry + 1;
            let delay = options.retry_policy.delay_for_attempt(next_retry as u32 + 1);
            sqlx::query(
                r#"
                UPDATE durable_task_queue
                SET status = 'pending', retry = $2, claimed_by = NULL, error_history = $3
                WHERE claim_id = $1
                "#,
            )
            .bind(claim_id)
            .bind(next_retry)
            .bind(&error_history_json)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            debug!(%claim_id, next_retry, "task will retry");
            Ok(TaskFailureOutcome::WillRetry {
                next_retry: next_retry as u32,
                delay,
            })
        } else {
            sqlx::query(
                r#"
                UPDATE durable_task_queue
                SET status = 'dead', error_history = $2
                WHERE claim_id = $1
                "#,
            )
            .bind(claim_id)
            .bind(&error_history_json)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            Ok(TaskFailureOutcome::Exhausted)
        }
    }

    #[instrument(skip(self))]
    async fn reclaim_stale(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, StoreError> {
        let threshold = Utc::now() - chrono::Duration::from_std(stale_threshold).unwrap_or_default();
        let rows = sqlx::query(
            r#"
            UPDATE durable_task_queue
            SET status = 'pending', claimed_by = NULL
            WHERE status = 'claimed' AND heartbeat_at < $1
            RETURNING claim_id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids = rows.iter().map(|r| r.get("claim_id")).collect::<Vec<Uuid>>();
        if !ids.is_empty() {
            debug!(count = ids.len(), "reclaimed stale task claims");
        }
        Ok(ids)
    }
}

#[async_trait]
impl TimerStore for PostgresStore {
    #[instrument(skip(self, row))]
    async fn schedule(&self, row: TimerRow) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&row.payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO durable_timers (schedule_id, execution_id, due_time, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(row.schedule_id)
        .bind(&row.execution_id.0)
        .bind(row.due_time)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel(&self, schedule_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM durable_timers WHERE schedule_id = $1")
            .bind(schedule_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<TimerRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM durable_timers
            WHERE schedule_id IN (
                SELECT schedule_id FROM durable_timers
                WHERE due_time <= $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING schedule_id, execution_id, due_time, payload
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let payload_json: serde_json::Value = row.get("payload");
                let payload = serde_json::from_value(payload_json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(TimerRow {
                    schedule_id: row.get("schedule_id"),
                    execution_id: ExecutionId(row.get("execution_id")),
                    due_time: row.get("due_time"),
                    payload,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for PostgresStore {
    #[instrument(skip(self, entry))]
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), StoreError> {
        let error_history = serde_json::to_value(&entry.error_history)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO durable_dead_letter_queue (
                id, execution_id, seq, name, input, attempts, error_history, dead_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.execution_id.0)
        .bind(entry.seq as i32)
        .bind(&entry.name)
        .bind(&entry.input)
        .bind(entry.attempts as i32)
        .bind(&error_history)
        .bind(entry.dead_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        execution_id: Option<ExecutionId>,
        page: Pagination,
    ) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let limit = if page.limit == 0 { 100 } else { page.limit } as i64;
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, seq, name, input, attempts, error_history, dead_at
            FROM durable_dead_letter_queue
            WHERE ($1::text IS NULL OR execution_id = $1)
            ORDER BY dead_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(execution_id.map(|e| e.0))
        .bind(page.offset as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let error_history_json: serde_json::Value = row.get("error_history");
                Ok(DeadLetterEntry {
                    id: row.get("id"),
                    execution_id: ExecutionId(row.get("execution_id")),
                    seq: row.get::<i32, _>("seq") as u32,
                    name: row.get("name"),
                    input: row.get("input"),
                    attempts: row.get::<i32, _>("attempts") as u32,
                    error_history: serde_json::from_value(error_history_json).unwrap_or_default(),
                    dead_at: row.get("dead_at"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn requeue(&self, id: Uuid) -> Result<TaskDispatchForRequeue, StoreError> {
        let row = sqlx::query(
            r#"
            DELETE FROM durable_dead_letter_queue WHERE id = $1
            RETURNING execution_id, seq, name, input
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::TaskNotFound(id))?;

        Ok(TaskDispatchForRequeue {
            execution_id: ExecutionId(row.get("execution_id")),
            seq: row.get::<i32, _>("seq") as u32,
            name: row.get("name"),
            input: row.get("input"),
        })
    }
}

#[async_trait]
impl EntityStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        let row = sqlx::query("SELECT value, version FROM durable_entities WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|row| VersionedValue {
            value: row.get("value"),
            version: row.get::<i64, _>("version") as u64,
        }))
    }

    #[instrument(skip(self, reads, writes))]
    async fn commit_if_unchanged(
        &self,
        reads: &[(String, u64)],
        writes: &[EntityWrite],
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut observed_versions = std::collections::HashMap::new();
        for (key, expected_version) in reads {
            let row = sqlx::query("SELECT version FROM durable_entities WHERE key = $1 FOR UPDATE")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            let actual = row.map(|r| r.get::<i64, _>("version") as u64).unwrap_or(0);
            if actual != *expected_version {
                return Ok(false);
            }
            observed_versions.insert(key.clone(), actual);
        }

        for write in writes {
            if observed_versions.contains_key(write.key()) {
                continue;
            }
            let row = sqlx::query("SELECT version FROM durable_entities WHERE key = $1 FOR UPDATE")
                .bind(write.key())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            let actual = row.map(|r| r.get::<i64, _>("version") as u64).unwrap_or(0);
            if actual != 0 {
                return Ok(false);
            }
        }

        for write in writes {
            match write {
                EntityWrite::Set { key, value } => {
                    sqlx::query(
                        r#"
                        INSERT INTO durable_entities (key, value, version)
                        VALUES ($1, $2, 1)
                        ON CONFLICT (key) DO UPDATE SET value = $2, version = durable_entities.version + 1
                        "#,
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                EntityWrite::Delete { key } => {
                    sqlx::query("DELETE FROM durable_entities WHERE key = $1")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    // Exercised by tests/postgres_integration_test.rs against a real
    // database (requires DATABASE_URL); nothing to unit-test here
    // without a connection.
}
