//! # Durable Execution Engine
//!
//! A storage-backed workflow orchestration engine for reliable,
//! distributed task execution: workflows are ordinary `async` Rust
//! functions, replayed against an append-only history log instead of
//! holding live state in memory between suspensions.
//!
//! ## Features
//!
//! - **Event-sourced workflows**: every state change is an appended
//!   history event; a workflow resumes by full replay, not by
//!   resurrecting an in-memory stack.
//! - **Automatic retries**: configurable retry policies with
//!   exponential backoff and jitter, shared by the task worker, the
//!   transaction executor and the event router.
//! - **Circuit breakers**: protect external task handlers from
//!   cascading failures.
//! - **Distributed task queue**: scalable task claim/dispatch with
//!   backpressure support.
//! - **Two-tier timers**: in-process sleeps for near-term timers, a
//!   persisted sweep for everything else.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │  (drains execution queue, replays workflow, runs commands)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │         HistoryStore / ExecutionStore / ExecutionQueue        │
//! │           (in-memory for tests, Postgres for deployment)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                              │
//! │  (claims dispatched tasks, executes handlers, heartbeats)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable_engine::prelude::*;
//!
//! async fn process_order(ctx: WorkflowContext, input: serde_json::Value) -> Result<serde_json::Value, WorkflowError> {
//!     let charge = ctx.task("charge_card", input, TaskOptions::default()).await?;
//!     ctx.timer(std::time::Duration::from_secs(1)).await;
//!     Ok(charge)
//! }
//!
//! let mut registry = WorkflowRegistry::new();
//! registry.register("process_order", process_order);
//! ```

pub mod command_executor;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod reliability;
pub mod signal;
pub mod store;
pub mod task;
pub mod timer;
pub mod transaction;
pub mod worker;
pub mod workflow;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::command_executor::{ChildWorkflowStarter, CommandError, CommandExecutor};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineHandle, StartOutcome, TransactionOutcome};
    pub use crate::error::EngineError;
    pub use crate::model::{
        EmittedEvent, Execution, ExecutionError, ExecutionId, ExecutionStatus, HistoryEvent,
        ParentRef, SignalTarget, StoreKind, TaskOptions, TimerDue, WorkflowCommand,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorError};
    pub use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
    pub use crate::signal::SignalRouter;
    pub use crate::store::{EntityStore, ExecutionQueue, ExecutionStore, HistoryStore, InMemoryStore, PostgresStore, StoreError, TaskQueueStore, TimerStore};
    pub use crate::task::{Task, TaskContext, TaskError, TaskOutcome, TaskRegistry, TaskServices};
    pub use crate::timer::{TimerService, TimerServiceConfig};
    pub use crate::transaction::{TransactionContext, TransactionError, TransactionRegistry};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerError};
    pub use crate::workflow::{Eventual, WorkflowContext, WorkflowError, WorkflowRegistry};
}

// Re-export key types at crate root.
pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle};
pub use error::EngineError;
pub use reliability::{CircuitBreakerConfig, RetryPolicy};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerError};
pub use workflow::{WorkflowContext, WorkflowError, WorkflowRegistry};
