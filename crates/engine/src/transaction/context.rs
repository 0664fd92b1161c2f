use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::EmittedEvent;
use crate::store::{EntityStore, EntityWrite};

use super::error::TransactionError;

#[derive(Default)]
pub(crate) struct TransactionLog {
    pub(crate) reads: HashMap<String, u64>,
    pub(crate) writes: HashMap<String, EntityWrite>,
    pub(crate) events: Vec<EmittedEvent>,
}

/// Shadow environment handed to a transaction function (§4.7 step 1):
/// reads are recorded with their observed version, writes are buffered
/// rather than applied immediately, and emitted events are held back
/// until commit succeeds.
#[derive(Clone)]
pub struct TransactionContext {
    store: Arc<dyn EntityStore>,
    log: Arc<Mutex<TransactionLog>>,
}

impl TransactionContext {
    pub(crate) fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            log: Arc::new(Mutex::new(TransactionLog::default())),
        }
    }

    pub(crate) fn reset(&self) {
        let mut log = self.log.lock();
        *log = TransactionLog::default();
    }

    pub(crate) fn take_log(&self) -> (Vec<(String, u64)>, Vec<EntityWrite>, Vec<EmittedEvent>) {
        let log = self.log.lock();
        (
            log.reads.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            log.writes.values().cloned().collect(),
            log.events.clone(),
        )
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TransactionError> {
        if let Some(write) = self.log.lock().writes.get(key) {
            return Ok(match write {
                EntityWrite::Set { value, .. } => Some(
                    serde_json::from_value(value.clone())
                        .map_err(TransactionError::Serialization)?,
                ),
                EntityWrite::Delete { .. } => None,
            });
        }

        let current = self.store.get(key).await?;
        let version = current.as_ref().map(|v| v.version).unwrap_or(0);
        self.log
            .lock()
            .reads
            .entry(key.to_string())
            .or_insert(version);

        match current {
            Some(v) => Ok(Some(
                serde_json::from_value(v.value).map_err(TransactionError::Serialization)?,
            )),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<(), TransactionError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(TransactionError::Serialization)?;
        self.log.lock().writes.insert(key.clone(), EntityWrite::Set { key, value });
        Ok(())
    }

    pub fn delete(&self, key: impl Into<String>) {
        let key = key.into();
        self.log.lock().writes.insert(key.clone(), EntityWrite::Delete { key });
    }

    /// Buffers an event; only published to subscribers once the
    /// transaction commits (§4.7 step 4).
    pub fn emit_event(&self, name: impl Into<String>, payload: impl Serialize) -> Result<(), TransactionError> {
        let payload = serde_json::to_value(payload).map_err(TransactionError::Serialization)?;
        self.log.lock().events.push(EmittedEvent {
            name: name.into(),
            payload,
        });
        Ok(())
    }
}
