use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{Execution, ExecutionError, ExecutionId, ExecutionStatus};

use super::error::StoreError;
use super::types::{ExecutionFilter, Pagination};

/// Execution metadata index: status, timing, parentage and input hash.
///
/// Status transitions are optimistic: [`ExecutionStore::update_status`]
/// only succeeds while the execution is still `IN_PROGRESS` (§5:
/// "at-most-one terminal transition").
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    /// Returns `false` without error if an execution under this id
    /// already exists (the caller is expected to compare input hashes
    /// to decide between "already running" and a conflict).
    async fn create(&self, execution: Execution) -> Result<bool, StoreError>;

    async fn get(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError>;

    async fn list(
        &self,
        filter: ExecutionFilter,
        page: Pagination,
    ) -> Result<Vec<Execution>, StoreError>;

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<ExecutionError>,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
