//! Core data model: executions, history events and workflow commands.
//!
//! These types are the wire format between every component in the
//! engine (orchestrator, executor, command executor, stores) and carry
//! no behavior of their own beyond construction helpers.

mod command;
mod event;
mod execution;

pub use command::{SignalTarget, StoreKind, StoreOperation, TaskOptions, TimerDue, WorkflowCommand};
pub use event::{EmittedEvent, HistoryEvent};
pub use execution::{hash_input, Execution, ExecutionError, ExecutionId, ExecutionStatus, ParentRef};
