use async_trait::async_trait;
use uuid::Uuid;

use super::error::StoreError;
use super::types::{ClaimedTask, HeartbeatResponse, TaskDispatch, TaskFailureOutcome};

/// Backing store for Task Worker dispatch: enqueue, claim
/// (`(executionId, seq, retry)` first-writer-wins), heartbeat,
/// completion and stale-claim reclamation (§4.4, §5).
#[async_trait]
pub trait TaskQueueStore: Send + Sync + 'static {
    async fn enqueue(&self, task: TaskDispatch) -> Result<Uuid, StoreError>;

    async fn claim(
        &self,
        worker_id: &str,
        task_names: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    async fn heartbeat(
        &self,
        claim_id: Uuid,
        worker_id: &str,
    ) -> Result<HeartbeatResponse, StoreError>;

    async fn complete(&self, claim_id: Uuid) -> Result<(), StoreError>;

    /// Returns the retry outcome. On exhaustion the caller is
    /// responsible for moving the claim to the dead-letter sink.
    async fn fail(&self, claim_id: Uuid, error: &str) -> Result<TaskFailureOutcome, StoreError>;

    async fn reclaim_stale(
        &self,
        stale_threshold: std::time::Duration,
    ) -> Result<Vec<Uuid>, StoreError>;
}
