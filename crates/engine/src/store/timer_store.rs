use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StoreError;
use super::types::TimerRow;

/// Backing store for the Timer Service's long-timer tier. Short
/// timers (due within the configured threshold) are held purely
/// in-process and never reach this store (§4.5).
#[async_trait]
pub trait TimerStore: Send + Sync + 'static {
    async fn schedule(&self, row: TimerRow) -> Result<(), StoreError>;

    async fn cancel(&self, schedule_id: Uuid) -> Result<(), StoreError>;

    /// Pops every schedule whose `due_time <= now`, deleting them
    /// atomically with the read (at-least-once delivery; firing twice
    /// is tolerated by the executor's event-id set).
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<TimerRow>, StoreError>;
}
