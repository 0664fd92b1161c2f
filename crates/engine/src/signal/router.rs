use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::model::{EmittedEvent, ExecutionId, HistoryEvent};
use crate::reliability::RetryPolicy;
use crate::store::{DeadLetterEntry, DeadLetterSink, ExecutionQueue, StoreError};

use super::subscription::Subscription;

/// Delivers `sendSignal` to a target execution's queue and fans
/// `emitEvents` out to every matching [`Subscription`] (§4.6).
pub struct SignalRouter {
    queue: Arc<dyn ExecutionQueue>,
    dead_letters: Arc<dyn DeadLetterSink>,
    retry_policy: RetryPolicy,
    subscriptions: Mutex<Vec<Subscription>>,
    dead_letter_seq: AtomicU32,
}

impl SignalRouter {
    pub fn new(queue: Arc<dyn ExecutionQueue>, dead_letters: Arc<dyn DeadLetterSink>, retry_policy: RetryPolicy) -> Self {
        Self {
            queue,
            dead_letters,
            retry_policy,
            subscriptions: Mutex::new(Vec::new()),
            dead_letter_seq: AtomicU32::new(0),
        }
    }

    pub fn subscribe(&self, subscription: Subscription) -> Uuid {
        let id = subscription.id;
        self.subscriptions.lock().push(subscription);
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscriptions.lock().retain(|s| s.id != id);
    }

    /// Writes `SignalReceived{signalId, payload, id}` to `target`'s
    /// queue. `id` defaults to a fresh id when the caller has no
    /// idempotency key to supply.
    #[instrument(skip(self, payload), fields(execution_id = %target.0))]
    pub async fn send_signal(
        &self,
        target: ExecutionId,
        signal_id: impl Into<String>,
        payload: serde_json::Value,
        id: Option<String>,
    ) -> Result<(), StoreError> {
        let id = id.unwrap_or_else(|| Uuid::now_v7().to_string());
        let event = HistoryEvent::SignalReceived {
            seq: None,
            id,
            signal_id: signal_id.into(),
            payload,
            timestamp: Utc::now(),
        };
        self.queue.enqueue(&target, vec![event]).await
    }

    /// Fans each envelope out to every matching subscription, retrying
    /// failed deliveries up to `retry_policy.max_attempts` before
    /// routing the delivery to the dead-letter sink.
    #[instrument(skip(self, envelopes))]
    pub async fn emit_events(&self, envelopes: Vec<EmittedEvent>) {
        let subscriptions: Vec<Arc<Subscription>> = {
            let guard = self.subscriptions.lock();
            guard.iter().map(|s| Arc::new(clone_subscription(s))).collect()
        };

        for envelope in envelopes {
            for subscription in &subscriptions {
                if !subscription.matches(&envelope.name, &envelope.payload) {
                    continue;
                }
                self.deliver_with_retry(subscription.clone(), &envelope).await;
            }
        }
    }

    async fn deliver_with_retry(&self, subscription: Arc<Subscription>, envelope: &EmittedEvent) {
        let mut attempt = 1u32;
        let mut errors = Vec::new();

        loop {
            match subscription.subscriber.deliver(&envelope.name, &envelope.payload).await {
                Ok(()) => return,
                Err(err) => {
                    errors.push(err);
                    if !self.retry_policy.has_attempts_remaining(attempt) {
                        break;
                    }
                    attempt += 1;
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                }
            }
        }

        warn!(subscription_id = %subscription.id, event = %envelope.name, "event delivery exhausted retries, dead-lettering");

        let seq = self.dead_letter_seq.fetch_add(1, Ordering::SeqCst);
        let entry = DeadLetterEntry {
            id: Uuid::now_v7(),
            execution_id: ExecutionId(format!("event-subscription/{}", subscription.id)),
            seq,
            name: envelope.name.clone(),
            input: envelope.payload.clone(),
            attempts: attempt,
            error_history: errors,
            dead_at: Utc::now(),
        };

        if let Err(err) = self.dead_letters.push(entry).await {
            warn!(%err, "failed to record dead-lettered event delivery");
        }
    }
}

fn clone_subscription(s: &Subscription) -> Subscription {
    Subscription {
        id: s.id,
        name: s.name.clone(),
        predicate: s.predicate.clone(),
        subscriber: s.subscriber.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber {
        hits: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl super::super::subscription::EventSubscriber for CountingSubscriber {
        async fn deliver(&self, _name: &str, _payload: &serde_json::Value) -> Result<(), String> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFailSubscriber;

    #[async_trait::async_trait]
    impl super::super::subscription::EventSubscriber for AlwaysFailSubscriber {
        async fn deliver(&self, _name: &str, _payload: &serde_json::Value) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn send_signal_enqueues_signal_received() {
        let store = Arc::new(InMemoryStore::new());
        let router = SignalRouter::new(store.clone(), store.clone(), RetryPolicy::no_retry());

        let target = ExecutionId("wf/exec-1".to_string());
        router
            .send_signal(target.clone(), "go", serde_json::json!("payload"), None)
            .await
            .unwrap();

        let batches = store.dequeue_batch(10).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].execution_id, target);
        assert!(matches!(batches[0].events[0], HistoryEvent::SignalReceived { .. }));
    }

    #[tokio::test]
    async fn emit_events_only_reaches_matching_subscriptions() {
        let store = Arc::new(InMemoryStore::new());
        let router = SignalRouter::new(store.clone(), store.clone(), RetryPolicy::no_retry());

        let hits = Arc::new(AtomicUsize::new(0));
        let subscriber = Arc::new(CountingSubscriber { hits: hits.clone() });
        router.subscribe(Subscription::new(subscriber).with_name("order.created"));

        router
            .emit_events(vec![
                EmittedEvent { name: "order.created".to_string(), payload: serde_json::json!({}) },
                EmittedEvent { name: "order.cancelled".to_string(), payload: serde_json::json!({}) },
            ])
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_delivery_retries_land_in_dead_letter_sink() {
        let store = Arc::new(InMemoryStore::new());
        let router = SignalRouter::new(
            store.clone(),
            store.clone(),
            RetryPolicy::fixed(std::time::Duration::from_millis(1), 2),
        );

        router.subscribe(Subscription::new(Arc::new(AlwaysFailSubscriber)));
        router
            .emit_events(vec![EmittedEvent { name: "never.ok".to_string(), payload: serde_json::json!(null) }])
            .await;

        let entries = store
            .list(None, crate::store::Pagination::first(10))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "never.ok");
    }
}
