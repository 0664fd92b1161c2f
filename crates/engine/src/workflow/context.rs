use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::{
    EmittedEvent, ExecutionError, ExecutionId, HistoryEvent, ParentRef, SignalTarget, StoreKind,
    StoreOperation, TaskOptions, TimerDue, WorkflowCommand,
};

/// The settled value of an in-flight eventual, recorded by the replay
/// driver as result events are drained from history.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Success(serde_json::Value),
    Failure(ExecutionError),
}

struct ConditionWatcher {
    seq: u32,
    predicate: Box<dyn Fn() -> bool>,
}

/// Everything a single workflow run needs to issue primitives
/// deterministically and resolve them as history is replayed. Lives
/// behind `Rc<RefCell<_>>` because a workflow run is driven by a single
/// cooperative fiber — there is never concurrent access from more than
/// one OS thread.
pub(crate) struct ContextState {
    next_seq: u32,
    expected: VecDeque<HistoryEvent>,
    commands: Vec<WorkflowCommand>,
    resolved: HashMap<u32, Resolution>,
    condition_watchers: Vec<ConditionWatcher>,
    received_signals: HashMap<String, Vec<serde_json::Value>>,
    determinism_error: Option<ExecutionError>,
    pub(crate) base_time: DateTime<Utc>,
    pub(crate) execution_id: ExecutionId,
    pub(crate) workflow_name: String,
    pub(crate) parent: Option<ParentRef>,
}

impl ContextState {
    pub(crate) fn new(
        expected: VecDeque<HistoryEvent>,
        base_time: DateTime<Utc>,
        execution_id: ExecutionId,
        workflow_name: String,
        parent: Option<ParentRef>,
    ) -> Self {
        Self {
            next_seq: 0,
            expected,
            commands: Vec::new(),
            resolved: HashMap::new(),
            condition_watchers: Vec::new(),
            received_signals: HashMap::new(),
            determinism_error: None,
            base_time,
            execution_id,
            workflow_name,
            parent,
        }
    }

    fn alloc_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Issues a new primitive: assigns it a `seq`, checks it against the
    /// next outstanding `expected` scheduled event (from a prior run of
    /// the same history) and either silently swallows it (already
    /// recorded) or appends a fresh command. Mismatches are fatal.
    fn request(&mut self, build: impl FnOnce(u32) -> WorkflowCommand) -> u32 {
        let seq = self.alloc_seq();
        let command = build(seq);
        match self.expected.pop_front() {
            Some(expected) if corresponds(&expected, &command) => {}
            Some(expected) => {
                self.determinism_error.get_or_insert_with(|| {
                    ExecutionError::determinism(format!(
                        "history expected {} at seq {seq} but workflow code issued {}",
                        expected.type_name(),
                        command_type_name(&command),
                    ))
                });
            }
            None => self.commands.push(command),
        }
        seq
    }

    pub(crate) fn has_determinism_error(&self) -> bool {
        self.determinism_error.is_some()
    }

    pub(crate) fn take_determinism_error(&mut self) -> Option<ExecutionError> {
        self.determinism_error.take()
    }

    pub(crate) fn take_commands(&mut self) -> Vec<WorkflowCommand> {
        std::mem::take(&mut self.commands)
    }

    pub(crate) fn resolve(&mut self, seq: u32, resolution: Resolution) {
        self.resolved.insert(seq, resolution);
    }

    fn take_resolution(&mut self, seq: u32) -> Option<Resolution> {
        self.resolved.remove(&seq)
    }

    pub(crate) fn record_signal(&mut self, signal_id: &str, payload: serde_json::Value) {
        self.received_signals
            .entry(signal_id.to_string())
            .or_default()
            .push(payload);
    }

    /// Re-evaluates every registered `condition()` predicate. Called by
    /// the replay driver after every drained event, per the
    /// after-every-event trigger.
    pub(crate) fn poll_condition_watchers(&mut self) {
        let mut resolved = Vec::new();
        self.condition_watchers.retain(|watcher| {
            if (watcher.predicate)() {
                resolved.push(watcher.seq);
                false
            } else {
                true
            }
        });
        for seq in resolved {
            self.resolved
                .insert(seq, Resolution::Success(serde_json::Value::Bool(true)));
        }
    }
}

fn command_type_name(command: &WorkflowCommand) -> &'static str {
    match command {
        WorkflowCommand::StartTask { .. } => "task_scheduled",
        WorkflowCommand::StartTimer { .. } => "timer_scheduled",
        WorkflowCommand::StartChildWorkflow { .. } => "child_workflow_scheduled",
        WorkflowCommand::SendSignal { .. } => "signal_sent",
        WorkflowCommand::EmitEvents { .. } => "events_emitted",
        WorkflowCommand::ExpectSignal { .. } => "signal_expect_started",
        WorkflowCommand::StartCondition { .. } => "condition_started",
        WorkflowCommand::InvokeTransaction { .. } => "transaction_request",
        WorkflowCommand::StoreOp { .. } => "store_request",
    }
}

fn corresponds(expected: &HistoryEvent, command: &WorkflowCommand) -> bool {
    use HistoryEvent as E;
    use WorkflowCommand as C;
    match (expected, command) {
        (E::TaskScheduled { name, .. }, C::StartTask { name: n, .. }) => name == n,
        (E::TimerScheduled { .. }, C::StartTimer { .. }) => true,
        (E::ChildWorkflowScheduled { name, .. }, C::StartChildWorkflow { name: n, .. }) => name == n,
        (E::SignalSent { signal_id, .. }, C::SendSignal { signal_id: s, .. }) => signal_id == s,
        (E::EventsEmitted { .. }, C::EmitEvents { .. }) => true,
        (E::SignalExpectStarted { signal_id, .. }, C::ExpectSignal { signal_id: s, .. }) => signal_id == s,
        (E::ConditionStarted { .. }, C::StartCondition { .. }) => true,
        (E::StoreRequest { kind, .. }, C::StoreOp { kind: k, .. }) => kind == k,
        (E::TransactionRequest { name, .. }, C::InvokeTransaction { name: n, .. }) => name == n,
        _ => false,
    }
}

/// A single pending engine primitive. Implements [`Future`] so workflow
/// code suspends on it with ordinary `.await`; resolution happens out
/// of band when the replay driver feeds the matching result event.
pub struct Eventual<T> {
    state: Rc<RefCell<ContextState>>,
    seq: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Eventual<T> {
    fn new(state: Rc<RefCell<ContextState>>, seq: u32) -> Self {
        Self {
            state,
            seq,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl<T: DeserializeOwned> Future for Eventual<T> {
    type Output = Result<T, ExecutionError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.state.borrow_mut();
        match state.take_resolution(this.seq) {
            Some(Resolution::Success(value)) => Poll::Ready(
                serde_json::from_value(value)
                    .map_err(|e| ExecutionError::new("DeserializeError", e.to_string())),
            ),
            Some(Resolution::Failure(err)) => Poll::Ready(Err(err)),
            None => Poll::Pending,
        }
    }
}

/// Cheap-clone handle passed to workflow code. Intentionally `!Send`:
/// a workflow run executes end to end on one cooperative fiber.
#[derive(Clone)]
pub struct WorkflowContext {
    pub(crate) state: Rc<RefCell<ContextState>>,
}

impl WorkflowContext {
    pub(crate) fn new(state: Rc<RefCell<ContextState>>) -> Self {
        Self { state }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.state.borrow().execution_id.clone()
    }

    pub fn workflow_name(&self) -> String {
        self.state.borrow().workflow_name.clone()
    }

    pub fn parent(&self) -> Option<ParentRef> {
        self.state.borrow().parent.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state.borrow().base_time
    }

    /// Schedules a task and suspends until it completes or fails.
    pub async fn task<T: DeserializeOwned>(
        &self,
        name: impl Into<String>,
        input: impl Serialize,
        options: TaskOptions,
    ) -> Result<T, ExecutionError> {
        let input = serde_json::to_value(input).expect("task input must serialize");
        let name = name.into();
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTask {
                seq,
                name,
                input,
                options,
            });
        Eventual::new(self.state.clone(), seq).await
    }

    /// Suspends for a fixed duration, measured from the run's base time.
    pub async fn timer(&self, duration: Duration) {
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTimer {
                seq,
                due: TimerDue::Relative(duration),
            });
        let _: Result<(), ExecutionError> = Eventual::new(self.state.clone(), seq).await;
    }

    /// Suspends until an absolute instant.
    pub async fn timer_until(&self, when: DateTime<Utc>) {
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTimer {
                seq,
                due: TimerDue::Absolute(when),
            });
        let _: Result<(), ExecutionError> = Eventual::new(self.state.clone(), seq).await;
    }

    /// Starts a child workflow and suspends until it settles.
    pub async fn child_workflow<T: DeserializeOwned>(
        &self,
        name: impl Into<String>,
        input: impl Serialize,
    ) -> Result<T, ExecutionError> {
        let input = serde_json::to_value(input).expect("child workflow input must serialize");
        let name = name.into();
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartChildWorkflow { seq, name, input });
        Eventual::new(self.state.clone(), seq).await
    }

    /// Fire-and-forget: sends a signal to another execution. Does not
    /// suspend; the command is recorded at the seq issued here.
    pub fn send_signal(
        &self,
        target: SignalTarget,
        signal_id: impl Into<String>,
        payload: impl Serialize,
        id: Option<String>,
    ) -> u32 {
        let payload = serde_json::to_value(payload).expect("signal payload must serialize");
        let signal_id = signal_id.into();
        self.state
            .borrow_mut()
            .request(|seq| WorkflowCommand::SendSignal {
                seq,
                target,
                signal_id,
                payload,
                id,
            })
    }

    /// Fire-and-forget: emits events to subscribers. Does not suspend.
    pub fn emit_events(&self, events: Vec<EmittedEvent>) -> u32 {
        self.state
            .borrow_mut()
            .request(|seq| WorkflowCommand::EmitEvents { seq, events })
    }

    /// Suspends until a signal with `signal_id` arrives, or the
    /// optional timeout elapses. Resolves to `Ok(None)` on timeout.
    pub async fn expect_signal<T: DeserializeOwned>(
        &self,
        signal_id: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, ExecutionError> {
        let signal_id = signal_id.into();
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::ExpectSignal {
                seq,
                signal_id,
                timeout,
            });
        match Eventual::<Option<serde_json::Value>>::new(self.state.clone(), seq).await? {
            Some(value) => Ok(Some(
                serde_json::from_value(value)
                    .map_err(|e| ExecutionError::new("DeserializeError", e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Suspends, re-evaluating `predicate` after every subsequently
    /// drained history event, until it returns `true` or `timeout`
    /// elapses. Resolves to `false` on timeout.
    pub async fn condition(
        &self,
        predicate: impl Fn() -> bool + 'static,
        timeout: Option<Duration>,
    ) -> bool {
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartCondition { seq, timeout });
        {
            let mut state = self.state.borrow_mut();
            if predicate() {
                state.resolve(seq, Resolution::Success(serde_json::Value::Bool(true)));
            } else {
                state.condition_watchers.push(ConditionWatcher {
                    seq,
                    predicate: Box::new(predicate),
                });
            }
        }
        Eventual::new(self.state.clone(), seq).await.unwrap_or(false)
    }

    /// Drains any fire-and-forget signals recorded for `signal_id` so
    /// far, without suspending.
    pub fn drain_signals<T: DeserializeOwned>(&self, signal_id: &str) -> Vec<T> {
        let mut state = self.state.borrow_mut();
        state
            .received_signals
            .remove(signal_id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    /// Invokes a named store operation (entity / bucket / search share
    /// one command shape, see [`StoreKind`]).
    pub async fn store_op<T: DeserializeOwned>(
        &self,
        kind: StoreKind,
        name: impl Into<String>,
        input: impl Serialize,
    ) -> Result<T, ExecutionError> {
        let input = serde_json::to_value(input).expect("store op input must serialize");
        let op = StoreOperation {
            name: name.into(),
            input,
        };
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StoreOp { seq, kind, op });
        Eventual::new(self.state.clone(), seq).await
    }

    /// Invokes a named transaction and suspends until it commits or
    /// exhausts its retry budget.
    pub async fn transaction<T: DeserializeOwned>(
        &self,
        name: impl Into<String>,
        input: impl Serialize,
    ) -> Result<T, ExecutionError> {
        let input = serde_json::to_value(input).expect("transaction input must serialize");
        let name = name.into();
        let seq = self
            .state
            .borrow_mut()
            .request(|seq| WorkflowCommand::InvokeTransaction { seq, name, input });
        Eventual::new(self.state.clone(), seq).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn state() -> Rc<RefCell<ContextState>> {
        Rc::new(RefCell::new(ContextState::new(
            VecDeque::new(),
            Utc::now(),
            ExecutionId::new("wf", "run-1"),
            "wf".into(),
            None,
        )))
    }

    #[test]
    fn new_task_request_with_no_expected_events_issues_a_command() {
        let state = state();
        let seq = state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTask {
                seq,
                name: "send_email".into(),
                input: serde_json::json!(null),
                options: TaskOptions::default(),
            });
        assert_eq!(seq, 0);
        assert_eq!(state.borrow().commands.len(), 1);
    }

    #[test]
    fn matching_expected_event_swallows_the_command() {
        let expected = VecDeque::from([HistoryEvent::TaskScheduled {
            seq: 0,
            name: "send_email".into(),
            input: serde_json::json!(null),
            timestamp: Utc::now(),
        }]);
        let state = Rc::new(RefCell::new(ContextState::new(
            expected,
            Utc::now(),
            ExecutionId::new("wf", "run-1"),
            "wf".into(),
            None,
        )));
        state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTask {
                seq,
                name: "send_email".into(),
                input: serde_json::json!(null),
                options: TaskOptions::default(),
            });
        assert!(state.borrow().commands.is_empty());
        assert!(!state.borrow().has_determinism_error());
    }

    #[test]
    fn mismatched_expected_event_raises_determinism_error() {
        let expected = VecDeque::from([HistoryEvent::TimerScheduled {
            seq: 0,
            until_time: Utc::now(),
            timestamp: Utc::now(),
        }]);
        let state = Rc::new(RefCell::new(ContextState::new(
            expected,
            Utc::now(),
            ExecutionId::new("wf", "run-1"),
            "wf".into(),
            None,
        )));
        state
            .borrow_mut()
            .request(|seq| WorkflowCommand::StartTask {
                seq,
                name: "send_email".into(),
                input: serde_json::json!(null),
                options: TaskOptions::default(),
            });
        assert!(state.borrow().has_determinism_error());
    }

    #[tokio::test]
    async fn condition_resolves_immediately_when_predicate_already_true() {
        let ctx = WorkflowContext::new(state());
        let flag = Rc::new(Cell::new(true));
        let watched = flag.clone();
        let met = ctx.condition(move || watched.get(), None).await;
        assert!(met);
    }
}
