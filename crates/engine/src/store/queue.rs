use async_trait::async_trait;

use crate::model::{ExecutionId, HistoryEvent};

use super::error::StoreError;
use super::types::WorkflowTask;

/// FIFO-per-execution delivery of workflow tasks.
///
/// The queue guarantees a single in-flight batch per `executionId`:
/// events enqueued for the same execution are delivered in the order
/// they were enqueued, and the orchestrator never sees two concurrent
/// batches for one execution (§5).
#[async_trait]
pub trait ExecutionQueue: Send + Sync + 'static {
    async fn enqueue(
        &self,
        execution_id: &ExecutionId,
        events: Vec<HistoryEvent>,
    ) -> Result<(), StoreError>;

    /// Pull up to `max` ready batches. Each returned [`WorkflowTask`]
    /// belongs to a distinct execution; the caller processes them
    /// concurrently (§4.2).
    async fn dequeue_batch(&self, max: usize) -> Result<Vec<WorkflowTask>, StoreError>;
}
