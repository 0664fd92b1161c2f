use async_trait::async_trait;

use super::error::StoreError;

#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub value: serde_json::Value,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub enum EntityWrite {
    Set { key: String, value: serde_json::Value },
    Delete { key: String },
}

impl EntityWrite {
    pub fn key(&self) -> &str {
        match self {
            EntityWrite::Set { key, .. } => key,
            EntityWrite::Delete { key } => key,
        }
    }
}

/// Versioned key/value store backing the Transaction Executor's
/// shadow-read/conditional-commit protocol (§4.7). `version=0` denotes
/// "key does not exist yet".
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, StoreError>;

    /// Applies `writes` iff every key in `reads` still carries the
    /// version it was observed at. Returns `false` on conflict (no
    /// writes applied) rather than an error — conflicts are expected
    /// and retried by the caller.
    async fn commit_if_unchanged(
        &self,
        reads: &[(String, u64)],
        writes: &[EntityWrite],
    ) -> Result<bool, StoreError>;
}
