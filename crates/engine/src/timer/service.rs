use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::model::HistoryEvent;
use crate::store::{ExecutionQueue, StoreError, TimerPayload, TimerRow, TimerStore};

use super::request::TimerRequest;

/// Two-tier timer configuration (§4.5): timers due within
/// `short_timer_threshold` bypass [`TimerStore`] entirely and are held
/// as an in-process sleep; everything else is persisted and picked up
/// by the background sweep every `poll_interval`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerServiceConfig {
    #[serde(with = "duration_millis")]
    pub short_timer_threshold: StdDuration,
    #[serde(with = "duration_millis")]
    pub poll_interval: StdDuration,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            short_timer_threshold: StdDuration::from_secs(30),
            poll_interval: StdDuration::from_millis(500),
        }
    }
}

/// Accepts `startTimer`/`scheduleEvent`/`clearSchedule` requests and
/// delivers fired payloads to the target execution's queue (§4.5).
pub struct TimerService {
    store: Arc<dyn TimerStore>,
    queue: Arc<dyn ExecutionQueue>,
    config: TimerServiceConfig,
    cancelled: Arc<Mutex<HashSet<Uuid>>>,
}

impl TimerService {
    pub fn new(store: Arc<dyn TimerStore>, queue: Arc<dyn ExecutionQueue>, config: TimerServiceConfig) -> Self {
        Self {
            store,
            queue,
            config,
            cancelled: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Convenience wrapper for the common `ScheduleEvent` request.
    #[instrument(skip(self, event))]
    pub async fn schedule_event(
        &self,
        execution_id: crate::model::ExecutionId,
        event: HistoryEvent,
        due: chrono::DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        self.start_timer(TimerRequest::ScheduleEvent {
            execution_id,
            event,
            due,
        })
        .await
    }

    #[instrument(skip(self, req), fields(execution_id = %req.execution_id().0))]
    pub async fn start_timer(&self, req: TimerRequest) -> Result<Uuid, StoreError> {
        let schedule_id = Uuid::now_v7();
        let execution_id = req.execution_id().clone();
        let due = req.due();
        let payload = match req {
            TimerRequest::ScheduleEvent { event, .. } => TimerPayload::ScheduleEvent { event },
            TimerRequest::HeartbeatMonitor {
                seq,
                claim_id,
                heartbeat_timeout,
                ..
            } => TimerPayload::HeartbeatMonitor {
                seq,
                claim_id,
                heartbeat_timeout,
            },
        };

        let remaining = (due - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);

        if remaining <= self.config.short_timer_threshold {
            self.spawn_short_timer(schedule_id, execution_id, payload, remaining);
        } else {
            self.store
                .schedule(TimerRow {
                    schedule_id,
                    execution_id,
                    due_time: due,
                    payload,
                })
                .await?;
        }

        Ok(schedule_id)
    }

    pub async fn clear_schedule(&self, schedule_id: Uuid) -> Result<(), StoreError> {
        self.cancelled.lock().insert(schedule_id);
        self.store.cancel(schedule_id).await
    }

    fn spawn_short_timer(
        &self,
        schedule_id: Uuid,
        execution_id: crate::model::ExecutionId,
        payload: TimerPayload,
        remaining: StdDuration,
    ) {
        let queue = self.queue.clone();
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;

            if cancelled.lock().remove(&schedule_id) {
                debug!(%schedule_id, "short timer cancelled before fire");
                return;
            }

            if let Err(err) = deliver(&queue, &execution_id, payload).await {
                warn!(%schedule_id, %err, "short timer delivery failed");
            }
        });
    }

    /// Drives the long-timer tier: polls [`TimerStore::take_due`] on
    /// `config.poll_interval` and forwards each due row to the target
    /// execution's queue. Runs until `shutdown` resolves.
    pub async fn run_sweep(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            let due = match self.store.take_due(Utc::now()).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%err, "timer sweep failed to read due rows");
                    continue;
                }
            };

            for row in due {
                if self.cancelled.lock().remove(&row.schedule_id) {
                    continue;
                }
                if let Err(err) = deliver(&self.queue, &row.execution_id, row.payload).await {
                    warn!(schedule_id = %row.schedule_id, %err, "long timer delivery failed");
                }
            }
        }
    }
}

async fn deliver(
    queue: &Arc<dyn ExecutionQueue>,
    execution_id: &crate::model::ExecutionId,
    payload: TimerPayload,
) -> Result<(), StoreError> {
    let event = match payload {
        TimerPayload::ScheduleEvent { event } => event,
        TimerPayload::HeartbeatMonitor { seq, .. } => HistoryEvent::TaskHeartbeatTimedOut {
            seq,
            timestamp: Utc::now(),
        },
    };
    queue.enqueue(execution_id, vec![event]).await
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionId;
    use crate::store::InMemoryStore;
    use chrono::Duration as ChronoDuration;

    fn service(config: TimerServiceConfig) -> (Arc<InMemoryStore>, TimerService) {
        let store = Arc::new(InMemoryStore::new());
        let service = TimerService::new(store.clone(), store.clone(), config);
        (store, service)
    }

    #[tokio::test]
    async fn short_timer_delivers_to_queue_after_fire() {
        let (store, svc) = service(TimerServiceConfig {
            short_timer_threshold: StdDuration::from_secs(5),
            poll_interval: StdDuration::from_millis(50),
        });

        let execution_id = ExecutionId("exec-1".to_string());
        svc.schedule_event(
            execution_id.clone(),
            HistoryEvent::TimerCompleted { seq: 1, timestamp: Utc::now() },
            Utc::now() + ChronoDuration::milliseconds(10),
        )
        .await
        .unwrap();

        tokio::time::sleep(StdDuration::from_millis(60)).await;

        let batches = store.dequeue_batch(10).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].execution_id, execution_id);
    }

    #[tokio::test]
    async fn cancelled_short_timer_never_delivers() {
        let (store, svc) = service(TimerServiceConfig {
            short_timer_threshold: StdDuration::from_secs(5),
            poll_interval: StdDuration::from_millis(50),
        });

        let execution_id = ExecutionId("exec-2".to_string());
        let schedule_id = svc
            .schedule_event(
                execution_id,
                HistoryEvent::TimerCompleted { seq: 1, timestamp: Utc::now() },
                Utc::now() + ChronoDuration::milliseconds(20),
            )
            .await
            .unwrap();

        svc.clear_schedule(schedule_id).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(60)).await;

        let batches = store.dequeue_batch(10).await.unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn long_timer_fires_via_sweep() {
        let (store, svc) = service(TimerServiceConfig {
            short_timer_threshold: StdDuration::from_millis(1),
            poll_interval: StdDuration::from_millis(20),
        });

        let execution_id = ExecutionId("exec-3".to_string());
        svc.schedule_event(
            execution_id.clone(),
            HistoryEvent::TimerCompleted { seq: 1, timestamp: Utc::now() },
            Utc::now() + ChronoDuration::milliseconds(30),
        )
        .await
        .unwrap();

        let (_tx, rx) = tokio::sync::watch::channel(false);
        let svc = Arc::new(svc);
        let sweep_svc = svc.clone();
        let handle = tokio::spawn(async move { sweep_svc.run_sweep(rx).await });

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        handle.abort();

        let batches = store.dequeue_batch(10).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].execution_id, execution_id);
    }
}
