use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, RawWaker, RawWakerVTable, Waker};

use chrono::{DateTime, Utc};

use crate::model::{ExecutionError, ExecutionId, HistoryEvent, ParentRef, WorkflowCommand};

use super::context::{ContextState, Resolution, WorkflowContext};
use super::error::WorkflowError;
use super::registry::WorkflowRegistry;

/// Outcome of driving a workflow run as far as the currently known
/// history allows.
pub enum RunOutcome {
    /// The run is suspended waiting on at least one eventual; `commands`
    /// are the new primitives it issued this run.
    Pending { commands: Vec<WorkflowCommand> },
    /// The workflow function returned.
    Settled {
        commands: Vec<WorkflowCommand>,
        result: Result<serde_json::Value, WorkflowError>,
    },
    /// A replayed scheduled event did not match what the workflow code
    /// issued at the same `seq` — the history and the code have
    /// diverged.
    Determinism(ExecutionError),
    /// No workflow is registered under this name.
    WorkflowNotFound,
}

/// Replays `history` against the registered workflow named
/// `workflow_name`, feeding every known result/signal event in order
/// and returning how far execution got. Always starts from `seq` 0 —
/// full-history replay is the only run mode; a prior run's commands
/// that are already recorded in `history` are swallowed silently via
/// correspondence checking instead of being re-emitted.
pub fn run(
    registry: &WorkflowRegistry,
    workflow_name: &str,
    input: serde_json::Value,
    history: &[HistoryEvent],
    base_time: DateTime<Utc>,
    execution_id: ExecutionId,
    parent: Option<ParentRef>,
) -> RunOutcome {
    if !registry.contains(workflow_name) {
        return RunOutcome::WorkflowNotFound;
    }

    let expected: VecDeque<HistoryEvent> = history.iter().filter(|e| e.is_scheduled()).cloned().collect();
    let state = Rc::new(RefCell::new(ContextState::new(
        expected,
        base_time,
        execution_id,
        workflow_name.to_string(),
        parent,
    )));

    let ctx = WorkflowContext::new(state.clone());
    let mut future = registry
        .invoke(workflow_name, ctx, input)
        .expect("presence already checked above");

    let waker = noop_waker();
    let mut task_cx = TaskContext::from_waker(&waker);

    // Drive to the first suspension point before any events are fed —
    // a workflow with no `.await` at all settles right here.
    if let Poll::Ready(result) = Pin::new(&mut future).poll(&mut task_cx) {
        return finish(&state, result);
    }
    if let Some(err) = state.borrow_mut().take_determinism_error() {
        return RunOutcome::Determinism(err);
    }

    for event in history.iter().filter(|e| e.is_result()) {
        feed(&state, event);
        state.borrow_mut().poll_condition_watchers();

        if let Poll::Ready(result) = Pin::new(&mut future).poll(&mut task_cx) {
            return finish(&state, result);
        }
        if let Some(err) = state.borrow_mut().take_determinism_error() {
            return RunOutcome::Determinism(err);
        }
    }

    RunOutcome::Pending {
        commands: state.borrow_mut().take_commands(),
    }
}

fn finish(
    state: &Rc<RefCell<ContextState>>,
    result: Result<serde_json::Value, WorkflowError>,
) -> RunOutcome {
    let commands = state.borrow_mut().take_commands();
    RunOutcome::Settled { commands, result }
}

fn feed(state: &Rc<RefCell<ContextState>>, event: &HistoryEvent) {
    use HistoryEvent as E;
    let mut state = state.borrow_mut();
    match event {
        E::TaskSucceeded { seq, result, .. } => {
            state.resolve(*seq, Resolution::Success(result.clone()))
        }
        E::TaskFailed {
            seq, error, message, ..
        } => state.resolve(*seq, Resolution::Failure(ExecutionError::new(error.clone(), message.clone()))),
        E::TaskHeartbeatTimedOut { seq, .. } => state.resolve(
            *seq,
            Resolution::Failure(ExecutionError::new("HeartbeatTimeout", "task missed its heartbeat deadline")),
        ),
        E::TimerCompleted { seq, .. } => {
            state.resolve(*seq, Resolution::Success(serde_json::Value::Null))
        }
        E::ChildWorkflowSucceeded { seq, result, .. } => {
            state.resolve(*seq, Resolution::Success(result.clone()))
        }
        E::ChildWorkflowFailed {
            seq, error, message, ..
        } => state.resolve(*seq, Resolution::Failure(ExecutionError::new(error.clone(), message.clone()))),
        E::SignalReceived {
            seq: Some(seq),
            payload,
            ..
        } => state.resolve(*seq, Resolution::Success(payload.clone())),
        E::SignalReceived {
            seq: None,
            signal_id,
            payload,
            ..
        } => state.record_signal(signal_id, payload.clone()),
        E::SignalTimedOut { seq, .. } => {
            state.resolve(*seq, Resolution::Success(serde_json::Value::Null))
        }
        E::ConditionTimedOut { seq, .. } => {
            state.resolve(*seq, Resolution::Success(serde_json::Value::Bool(false)))
        }
        E::StoreRequestSucceeded { seq, result, .. } => {
            state.resolve(*seq, Resolution::Success(result.clone()))
        }
        E::StoreRequestFailed {
            seq, error, message, ..
        } => state.resolve(*seq, Resolution::Failure(ExecutionError::new(error.clone(), message.clone()))),
        E::TransactionRequestSucceeded { seq, output, .. } => {
            state.resolve(*seq, Resolution::Success(output.clone()))
        }
        E::TransactionRequestFailed {
            seq, error, message, ..
        } => state.resolve(*seq, Resolution::Failure(ExecutionError::new(error.clone(), message.clone()))),
        _ => {}
    }
}

/// Synthesizes `TimerCompleted` events for every `TimerScheduled` whose
/// `until_time` has passed as of `now` and that has no completion yet.
/// Scanning history for due-but-undelivered timers this way means the
/// Timer Service never has to be polled synchronously from the replay
/// path.
pub fn synthesize_timer_completions(history: &[HistoryEvent], now: DateTime<Utc>) -> Vec<HistoryEvent> {
    let completed: std::collections::HashSet<u32> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::TimerCompleted { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();

    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::TimerScheduled {
                seq, until_time, ..
            } if *until_time <= now && !completed.contains(seq) => Some(HistoryEvent::TimerCompleted {
                seq: *seq,
                timestamp: now,
            }),
            _ => None,
        })
        .collect()
}

/// Synthesizes `SignalTimedOut` for every `SignalExpectStarted` whose
/// `timeout_time` has passed without a matching `SignalReceived{seq}`.
pub fn synthesize_signal_timeouts(history: &[HistoryEvent], now: DateTime<Utc>) -> Vec<HistoryEvent> {
    let settled: std::collections::HashSet<u32> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::SignalReceived { seq: Some(seq), .. } => Some(*seq),
            HistoryEvent::SignalTimedOut { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();

    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::SignalExpectStarted {
                seq,
                signal_id,
                timeout_time: Some(deadline),
                ..
            } if *deadline <= now && !settled.contains(seq) => Some(HistoryEvent::SignalTimedOut {
                seq: *seq,
                signal_id: signal_id.clone(),
                timestamp: now,
            }),
            _ => None,
        })
        .collect()
}

/// Matches fire-and-forget `SignalReceived{seq:None}` deliveries against
/// still-open `SignalExpectStarted{seq}` waits by `signal_id`, oldest
/// delivery to oldest wait, and synthesizes the `seq`-addressed
/// `SignalReceived` companion that actually resolves the waiting
/// `Eventual`. The raw `seq:None` record is left in history untouched —
/// `drain_signals` still sees it — this only adds the matched copy.
pub fn synthesize_signal_deliveries(history: &[HistoryEvent], now: DateTime<Utc>) -> Vec<HistoryEvent> {
    let resolved: HashSet<u32> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::SignalReceived { seq: Some(seq), .. } => Some(*seq),
            HistoryEvent::SignalTimedOut { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();

    let mut consumed: HashSet<String> = HashSet::new();
    let mut synthesized = Vec::new();

    for event in history {
        let (seq, signal_id) = match event {
            HistoryEvent::SignalExpectStarted { seq, signal_id, .. } if !resolved.contains(seq) => (*seq, signal_id),
            _ => continue,
        };

        let delivery = history.iter().find(|e| match e {
            HistoryEvent::SignalReceived { seq: None, id, signal_id: sid, .. } => {
                sid == signal_id && !consumed.contains(id)
            }
            _ => false,
        });

        if let Some(HistoryEvent::SignalReceived { id, payload, .. }) = delivery {
            consumed.insert(id.clone());
            synthesized.push(HistoryEvent::SignalReceived {
                seq: Some(seq),
                id: id.clone(),
                signal_id: signal_id.clone(),
                payload: payload.clone(),
                timestamp: now,
            });
        }
    }

    synthesized
}

/// Synthesizes `ConditionTimedOut` for every `ConditionStarted` whose
/// `timeout_time` has passed without the predicate resolving it first.
pub fn synthesize_condition_timeouts(history: &[HistoryEvent], now: DateTime<Utc>) -> Vec<HistoryEvent> {
    let settled: std::collections::HashSet<u32> = history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ConditionTimedOut { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();

    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ConditionStarted {
                seq,
                timeout_time: Some(deadline),
                ..
            } if *deadline <= now && !settled.contains(seq) => {
                Some(HistoryEvent::ConditionTimedOut { seq: *seq, timestamp: now })
            }
            _ => None,
        })
        .collect()
}

fn noop_waker() -> Waker {
    fn no_op(_: *const ()) {}
    fn clone(_: *const ()) -> RawWaker {
        raw_waker()
    }
    fn raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    unsafe { Waker::from_raw(raw_waker()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::error::WorkflowError;

    fn registry_with_simple_task_workflow() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new();
        registry.register("ship_order", |ctx, order_id: String| async move {
            let receipt: String = ctx
                .task("charge_card", order_id, Default::default())
                .await
                .map_err(WorkflowError::from)?;
            Ok::<_, WorkflowError>(receipt)
        });
        registry
    }

    #[test]
    fn first_run_suspends_and_issues_one_command() {
        let registry = registry_with_simple_task_workflow();
        let outcome = run(
            &registry,
            "ship_order",
            serde_json::json!("order-1"),
            &[],
            Utc::now(),
            ExecutionId::new("ship_order", "run-1"),
            None,
        );
        match outcome {
            RunOutcome::Pending { commands } => assert_eq!(commands.len(), 1),
            _ => panic!("expected a pending run"),
        }
    }

    #[test]
    fn replay_with_task_result_settles_the_workflow() {
        let registry = registry_with_simple_task_workflow();
        let history = vec![
            HistoryEvent::TaskScheduled {
                seq: 0,
                name: "charge_card".into(),
                input: serde_json::json!("order-1"),
                timestamp: Utc::now(),
            },
            HistoryEvent::TaskSucceeded {
                seq: 0,
                result: serde_json::json!("receipt-1"),
                timestamp: Utc::now(),
            },
        ];
        let outcome = run(
            &registry,
            "ship_order",
            serde_json::json!("order-1"),
            &history,
            Utc::now(),
            ExecutionId::new("ship_order", "run-1"),
            None,
        );
        match outcome {
            RunOutcome::Settled { result, commands } => {
                assert!(commands.is_empty());
                assert_eq!(result.unwrap(), serde_json::json!("receipt-1"));
            }
            _ => panic!("expected a settled run"),
        }
    }

    #[test]
    fn diverged_history_raises_determinism_error() {
        let registry = registry_with_simple_task_workflow();
        let history = vec![HistoryEvent::TimerScheduled {
            seq: 0,
            until_time: Utc::now(),
            timestamp: Utc::now(),
        }];
        let outcome = run(
            &registry,
            "ship_order",
            serde_json::json!("order-1"),
            &history,
            Utc::now(),
            ExecutionId::new("ship_order", "run-1"),
            None,
        );
        assert!(matches!(outcome, RunOutcome::Determinism(_)));
    }

    #[test]
    fn unregistered_workflow_name_is_reported() {
        let registry = WorkflowRegistry::new();
        let outcome = run(
            &registry,
            "missing",
            serde_json::json!(null),
            &[],
            Utc::now(),
            ExecutionId::new("missing", "run-1"),
            None,
        );
        assert!(matches!(outcome, RunOutcome::WorkflowNotFound));
    }

    #[test]
    fn synthesizes_timer_completion_once_due() {
        let now = Utc::now();
        let history = vec![HistoryEvent::TimerScheduled {
            seq: 0,
            until_time: now - chrono::Duration::seconds(1),
            timestamp: now - chrono::Duration::seconds(5),
        }];
        let synthesized = synthesize_timer_completions(&history, now);
        assert_eq!(synthesized.len(), 1);
        assert!(matches!(synthesized[0], HistoryEvent::TimerCompleted { seq: 0, .. }));
    }

    #[test]
    fn does_not_resynthesize_already_completed_timer() {
        let now = Utc::now();
        let history = vec![
            HistoryEvent::TimerScheduled {
                seq: 0,
                until_time: now - chrono::Duration::seconds(1),
                timestamp: now - chrono::Duration::seconds(5),
            },
            HistoryEvent::TimerCompleted { seq: 0, timestamp: now },
        ];
        assert!(synthesize_timer_completions(&history, now).is_empty());
    }

    #[test]
    fn synthesizes_matching_signal_delivery_for_open_expect() {
        let now = Utc::now();
        let history = vec![
            HistoryEvent::SignalExpectStarted {
                seq: 0,
                signal_id: "go".into(),
                timeout_time: None,
                timestamp: now,
            },
            HistoryEvent::SignalReceived {
                seq: None,
                id: "delivery-1".into(),
                signal_id: "go".into(),
                payload: serde_json::json!("ok"),
                timestamp: now,
            },
        ];
        let synthesized = synthesize_signal_deliveries(&history, now);
        assert_eq!(synthesized.len(), 1);
        match &synthesized[0] {
            HistoryEvent::SignalReceived { seq: Some(0), payload, .. } => {
                assert_eq!(*payload, serde_json::json!("ok"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn does_not_rematch_an_already_resolved_expect() {
        let now = Utc::now();
        let history = vec![
            HistoryEvent::SignalExpectStarted {
                seq: 0,
                signal_id: "go".into(),
                timeout_time: None,
                timestamp: now,
            },
            HistoryEvent::SignalReceived {
                seq: Some(0),
                id: "delivery-1".into(),
                signal_id: "go".into(),
                payload: serde_json::json!("ok"),
                timestamp: now,
            },
        ];
        assert!(synthesize_signal_deliveries(&history, now).is_empty());
    }

    #[test]
    fn synthesizes_signal_timeout_once_deadline_passes() {
        let now = Utc::now();
        let history = vec![HistoryEvent::SignalExpectStarted {
            seq: 0,
            signal_id: "approval".into(),
            timeout_time: Some(now - chrono::Duration::seconds(1)),
            timestamp: now - chrono::Duration::seconds(5),
        }];
        let synthesized = synthesize_signal_timeouts(&history, now);
        assert_eq!(synthesized.len(), 1);
        assert!(matches!(synthesized[0], HistoryEvent::SignalTimedOut { seq: 0, .. }));
    }
}
