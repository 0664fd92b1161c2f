//! Data-plane stores: history log, execution index, execution queue,
//! task queue, timer schedule, dead-letter sink and versioned entity
//! store. Each concern is a trait; [`memory::InMemoryStore`] and
//! [`postgres::PostgresStore`] each implement all seven.

mod dead_letter;
mod entity;
mod error;
mod execution;
mod history;
mod memory;
mod postgres;
mod queue;
mod task_queue;
mod timer_store;
mod types;

pub use dead_letter::{DeadLetterSink, TaskDispatchForRequeue};
pub use entity::{EntityStore, EntityWrite, VersionedValue};
pub use error::StoreError;
pub use execution::ExecutionStore;
pub use history::HistoryStore;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use queue::ExecutionQueue;
pub use task_queue::TaskQueueStore;
pub use timer_store::TimerStore;
pub use types::{
    ClaimedTask, DeadLetterEntry, ExecutionFilter, HeartbeatResponse, Pagination, TaskDispatch,
    TaskFailureOutcome, TimerPayload, TimerRow, WorkflowTask,
};
