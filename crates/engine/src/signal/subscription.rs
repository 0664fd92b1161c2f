use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// A subscriber the Event Router fans `emitEvents` envelopes out to.
/// Defined out-of-core; the router only needs the delivery contract.
#[async_trait]
pub trait EventSubscriber: Send + Sync + 'static {
    async fn deliver(&self, name: &str, payload: &serde_json::Value) -> Result<(), String>;
}

/// A standing registration matched against every emitted event by
/// {name equality, predicate} (§4.6).
pub struct Subscription {
    pub id: Uuid,
    pub name: Option<String>,
    pub predicate: Option<Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>>,
    pub subscriber: Arc<dyn EventSubscriber>,
}

impl Subscription {
    pub fn new(subscriber: Arc<dyn EventSubscriber>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: None,
            predicate: None,
            subscriber,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, name: &str, payload: &serde_json::Value) -> bool {
        if let Some(expected) = &self.name {
            if expected != name {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(payload) {
                return false;
            }
        }
        true
    }
}
