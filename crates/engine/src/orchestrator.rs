//! Orchestrator (§4.2)
//!
//! Drains execution-queue batches, replays each execution's history
//! against its registered workflow, executes the commands the replay
//! issued and persists the result. One execution's failure to
//! orchestrate is isolated from its batch-mates (partial-failure
//! policy).

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, instrument, warn};

use crate::command_executor::CommandExecutor;
use crate::config::OrchestratorConfig;
use crate::model::{ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent, ParentRef};
use crate::store::{ExecutionQueue, ExecutionStore, HistoryStore, StoreError};
use crate::timer::TimerService;
use crate::workflow::{self, RunOutcome, WorkflowRegistry};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{execution_id}: {0}", execution_id = .0)]
    Determinism(ExecutionError),
}

/// Drains and orchestrates execution-queue batches against the
/// registered workflows.
pub struct Orchestrator {
    history: Arc<dyn HistoryStore>,
    executions: Arc<dyn ExecutionStore>,
    queue: Arc<dyn ExecutionQueue>,
    timers: Arc<TimerService>,
    registry: Arc<WorkflowRegistry>,
    commands: Arc<CommandExecutor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        executions: Arc<dyn ExecutionStore>,
        queue: Arc<dyn ExecutionQueue>,
        timers: Arc<TimerService>,
        registry: Arc<WorkflowRegistry>,
        commands: Arc<CommandExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            history,
            executions,
            queue,
            timers,
            registry,
            commands,
            config,
        }
    }

    /// Drains up to `max_batches` ready tasks and orchestrates each
    /// execution concurrently (§4.2 step 2). Returns the ids of
    /// executions whose orchestration failed.
    pub async fn drain(&self, max_batches: usize) -> Result<Vec<ExecutionId>, OrchestratorError> {
        let batches = self.queue.dequeue_batch(max_batches).await?;
        let results = join_all(batches.into_iter().map(|batch| self.orchestrate_one(batch.execution_id, batch.events))).await;

        Ok(results.into_iter().filter_map(|r| r.err()).collect())
    }

    /// Orchestrates a single execution's batch of incoming events to
    /// completion of one replay cycle (§4.2 step 2a-j).
    #[instrument(skip(self, incoming), fields(%execution_id))]
    pub async fn orchestrate_one(
        &self,
        execution_id: ExecutionId,
        incoming: Vec<HistoryEvent>,
    ) -> Result<(), ExecutionId> {
        match self.run_one(&execution_id, incoming).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(%execution_id, "orchestration failed: {e}");
                Err(execution_id)
            }
        }
    }

    async fn run_one(
        &self,
        execution_id: &ExecutionId,
        incoming: Vec<HistoryEvent>,
    ) -> Result<(), OrchestratorError> {
        let now = Utc::now();

        let execution = self
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| OrchestratorError::Determinism(ExecutionError::determinism("execution record missing")))?;
        let workflow_name = execution.workflow_name.clone();
        let input = execution.input.clone();
        let parent = execution.parent.clone();

        let mut history = self.history.load(execution_id).await?;

        merge_by_event_id(&mut history, incoming);
        let synthesized = workflow::synthesize_timer_completions(&history, now)
            .into_iter()
            .chain(workflow::synthesize_signal_timeouts(&history, now))
            .chain(workflow::synthesize_condition_timeouts(&history, now))
            .chain(workflow::synthesize_signal_deliveries(&history, now))
            .collect::<Vec<_>>();
        merge_by_event_id(&mut history, synthesized);

        let is_first_run = !history.iter().any(|e| matches!(e, HistoryEvent::WorkflowRunStarted { .. }));
        if is_first_run {
            if let Some(deadline) = execution.timeout_time {
                let _ = self
                    .timers
                    .schedule_event(execution_id.clone(), HistoryEvent::WorkflowTimedOut { timestamp: deadline }, deadline)
                    .await;
            }
        }

        let run = next_run_number(&history);
        let mut new_events = vec![HistoryEvent::WorkflowRunStarted { run, timestamp: now }];

        if !history.iter().any(|e| matches!(e, HistoryEvent::WorkflowStarted { .. })) {
            let e = ExecutionError::determinism("history is missing its WorkflowStarted event");
            new_events.push(HistoryEvent::WorkflowFailed {
                error: e.error,
                message: e.message,
                timestamp: now,
            });
            new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: now });
            self.finalize(execution_id, &mut history, new_events, parent).await?;
            return Ok(());
        }

        if !self.registry.contains(&workflow_name) {
            let e = ExecutionError::workflow_not_found(&workflow_name);
            new_events.push(HistoryEvent::WorkflowFailed {
                error: e.error,
                message: e.message,
                timestamp: now,
            });
            new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: now });
            self.finalize(execution_id, &mut history, new_events, parent).await?;
            return Ok(());
        }

        let outcome = workflow::run(
            &self.registry,
            &workflow_name,
            input,
            &history,
            now,
            execution_id.clone(),
            parent.clone(),
        );

        match outcome {
            RunOutcome::WorkflowNotFound => {
                let e = ExecutionError::workflow_not_found(&workflow_name);
                new_events.push(HistoryEvent::WorkflowFailed {
                    error: e.error,
                    message: e.message,
                    timestamp: now,
                });
                new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: now });
            }
            RunOutcome::Determinism(err) => {
                new_events.push(HistoryEvent::WorkflowFailed {
                    error: err.error,
                    message: err.message,
                    timestamp: now,
                });
                new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: now });
            }
            RunOutcome::Pending { commands } => {
                let scheduled = self
                    .commands
                    .execute_all(execution_id, &workflow_name, commands, now)
                    .await;
                new_events.extend(scheduled);
                new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: Utc::now() });
            }
            RunOutcome::Settled { commands, result } => {
                let scheduled = self
                    .commands
                    .execute_all(execution_id, &workflow_name, commands, now)
                    .await;
                new_events.extend(scheduled);
                new_events.push(HistoryEvent::WorkflowRunCompleted { run, timestamp: Utc::now() });
                match result {
                    Ok(output) => new_events.push(HistoryEvent::WorkflowSucceeded { output, timestamp: Utc::now() }),
                    Err(e) => {
                        let e = e.into_execution_error();
                        new_events.push(HistoryEvent::WorkflowFailed {
                            error: e.error,
                            message: e.message,
                            timestamp: Utc::now(),
                        })
                    }
                }
            }
        }

        self.finalize(execution_id, &mut history, new_events, parent).await?;

        if history.len() > self.config.max_events_per_run {
            warn!(%execution_id, len = history.len(), "execution history exceeds configured budget");
        }

        Ok(())
    }

    async fn finalize(
        &self,
        execution_id: &ExecutionId,
        history: &mut Vec<HistoryEvent>,
        new_events: Vec<HistoryEvent>,
        parent: Option<ParentRef>,
    ) -> Result<(), OrchestratorError> {
        let expected_len = history.len();
        merge_by_event_id(history, new_events.clone());
        self.history.append(execution_id, expected_len, new_events.clone()).await?;

        if let Some(terminal) = new_events.iter().find(|e| e.is_terminal()) {
            let (status, result, error) = match terminal {
                HistoryEvent::WorkflowSucceeded { output, .. } => (ExecutionStatus::Succeeded, Some(output.clone()), None),
                HistoryEvent::WorkflowFailed { error, message, .. } => {
                    (ExecutionStatus::Failed, None, Some(ExecutionError::new(error.clone(), message.clone())))
                }
                HistoryEvent::WorkflowTimedOut { .. } => (ExecutionStatus::TimedOut, None, Some(ExecutionError::timeout())),
                _ => unreachable!("is_terminal() guarantees one of the above"),
            };

            self.executions
                .update_status(execution_id, status, result.clone(), error.clone(), terminal.timestamp())
                .await?;

            if let Some(parent) = parent {
                let child_event = match status {
                    ExecutionStatus::Succeeded => HistoryEvent::ChildWorkflowSucceeded {
                        seq: parent.seq,
                        result: result.unwrap_or(serde_json::Value::Null),
                        timestamp: Utc::now(),
                    },
                    _ => HistoryEvent::ChildWorkflowFailed {
                        seq: parent.seq,
                        error: error.clone().map(|e| e.error).unwrap_or_default(),
                        message: error.map(|e| e.message).unwrap_or_default(),
                        timestamp: Utc::now(),
                    },
                };
                self.queue.enqueue(&parent.execution_id, vec![child_event]).await?;
            }
        }

        Ok(())
    }
}

/// Merges `incoming` into `history` by [`HistoryEvent::event_id`],
/// preserving history's existing order and appending only events not
/// already present (§3: "history is a set under this identity").
fn merge_by_event_id(history: &mut Vec<HistoryEvent>, incoming: Vec<HistoryEvent>) {
    let seen: std::collections::HashSet<String> = history.iter().map(|e| e.event_id()).collect();
    for event in incoming {
        if !seen.contains(&event.event_id()) {
            history.push(event);
        }
    }
}

fn next_run_number(history: &[HistoryEvent]) -> u32 {
    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::WorkflowRunStarted { run, .. } => Some(*run + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}
