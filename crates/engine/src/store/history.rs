use async_trait::async_trait;

use crate::model::{ExecutionId, HistoryEvent};

use super::error::StoreError;

/// Append-only per-execution event log.
///
/// `append` is optimistically concurrent on the log's current length:
/// callers pass the length they observed when they decided what to
/// append, and a mismatch means someone else appended first.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    async fn append(
        &self,
        execution_id: &ExecutionId,
        expected_len: usize,
        events: Vec<HistoryEvent>,
    ) -> Result<usize, StoreError>;

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<HistoryEvent>, StoreError>;
}
