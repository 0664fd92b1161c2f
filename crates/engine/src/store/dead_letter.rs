use async_trait::async_trait;
use uuid::Uuid;

use crate::model::ExecutionId;

use super::error::StoreError;
use super::types::{DeadLetterEntry, Pagination};

/// Terminal sink for deliveries that exhausted their retry budget:
/// dead task attempts (§4.4) and dead event-subscriber deliveries
/// (§4.6).
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), StoreError>;

    async fn list(
        &self,
        execution_id: Option<ExecutionId>,
        page: Pagination,
    ) -> Result<Vec<DeadLetterEntry>, StoreError>;

    async fn requeue(&self, id: Uuid) -> Result<TaskDispatchForRequeue, StoreError>;
}

/// What the caller needs to rebuild a [`crate::store::types::TaskDispatch`]
/// from a dead-letter entry.
#[derive(Debug, Clone)]
pub struct TaskDispatchForRequeue {
    pub execution_id: ExecutionId,
    pub seq: u32,
    pub name: String,
    pub input: serde_json::Value,
}
