//! Task Worker pool (§4.4)
//!
//! Claims dispatched tasks, resolves their handler in the [`TaskRegistry`],
//! runs them to completion or to the async sentinel, and reports the
//! result back onto the owning execution's queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::model::HistoryEvent;
use crate::store::{
    ClaimedTask, DeadLetterEntry, DeadLetterSink, ExecutionQueue, StoreError, TaskFailureOutcome,
    TaskQueueStore,
};
use crate::task::{TaskContext, TaskError, TaskOutcome, TaskRegistry, TaskServices};

use super::backpressure::{BackpressureConfig, BackpressureState};
use super::poller::{PollerConfig, PollerError, TaskPoller};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Worker group for logical organization
    pub worker_group: String,

    /// Task names this worker claims; empty means "any"
    pub task_names: Vec<String>,

    /// Maximum concurrent task executions
    pub max_concurrency: usize,

    /// Backpressure configuration
    pub backpressure: BackpressureConfig,

    /// Poller configuration
    pub poller: PollerConfig,

    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    #[serde(with = "duration_millis")]
    pub stale_reclaim_interval: Duration,

    #[serde(with = "duration_millis")]
    pub stale_threshold: Duration,

    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            worker_group: "default".to_string(),
            task_names: vec![],
            max_concurrency: 10,
            backpressure: BackpressureConfig::default(),
            poller: PollerConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
            stale_reclaim_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(task_names: Vec<String>) -> Self {
        Self {
            task_names,
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_worker_group(mut self, group: impl Into<String>) -> Self {
        self.worker_group = group.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("worker pool is not running")]
    NotRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Worker pool for executing tasks claimed from the [`TaskQueueStore`].
pub struct WorkerPool {
    store: Arc<dyn TaskQueueStore>,
    queue: Arc<dyn ExecutionQueue>,
    dead_letters: Arc<dyn DeadLetterSink>,
    registry: Arc<TaskRegistry>,
    services: Arc<dyn TaskServices>,
    config: WorkerPoolConfig,
    backpressure: Arc<BackpressureState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: std::sync::RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    reclaim_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    cancellations: Arc<parking_lot::Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskQueueStore>,
        queue: Arc<dyn ExecutionQueue>,
        dead_letters: Arc<dyn DeadLetterSink>,
        registry: Arc<TaskRegistry>,
        services: Arc<dyn TaskServices>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backpressure = Arc::new(BackpressureState::new(
            config.backpressure.clone(),
            config.max_concurrency,
        ));

        Self {
            store,
            queue,
            dead_letters,
            registry,
            services,
            config: config.clone(),
            backpressure,
            shutdown_tx,
            shutdown_rx,
            status: std::sync::RwLock::new(WorkerPoolStatus::Stopped),
            active_tasks: Arc::new(Semaphore::new(config.max_concurrency)),
            poll_handle: std::sync::Mutex::new(None),
            reclaim_handle: std::sync::Mutex::new(None),
            cancellations: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Running {
                return Err(WorkerError::AlreadyRunning);
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            task_names = ?self.config.task_names,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        *self.status.write().unwrap() = WorkerPoolStatus::Running;

        self.start_poll_loop();
        self.start_reclaim_loop();

        Ok(())
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
        }

        info!(worker_id = %self.config.worker_id, "initiating graceful shutdown");

        *self.status.write().unwrap() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;

        loop {
            let available = self.active_tasks.available_permits();
            if available == self.config.max_concurrency {
                debug!("all tasks completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_tasks = self.config.max_concurrency - available,
                    "shutdown timeout reached"
                );
                return Err(WorkerError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write().unwrap() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read().unwrap()
    }

    pub fn current_load(&self) -> usize {
        self.backpressure.current_load()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn is_accepting(&self) -> bool {
        self.backpressure.is_accepting() && *self.status.read().unwrap() == WorkerPoolStatus::Running
    }

    /// Cooperatively cancels an in-flight task, if the worker pool
    /// still holds its claim. Used when a heartbeat response reports
    /// `should_cancel`.
    fn cancel(&self, claim_id: Uuid) {
        if let Some(token) = self.cancellations.lock().get(&claim_id) {
            token.cancel();
        }
    }

    fn start_poll_loop(&self) {
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let dead_letters = Arc::clone(&self.dead_letters);
        let registry = Arc::clone(&self.registry);
        let services = Arc::clone(&self.services);
        let config = self.config.clone();
        let backpressure = Arc::clone(&self.backpressure);
        let active_tasks = Arc::clone(&self.active_tasks);
        let cancellations = Arc::clone(&self.cancellations);
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut poller = TaskPoller::new(
                store.clone(),
                config.worker_id.clone(),
                config.task_names.clone(),
                config.poller.clone(),
                shutdown_rx.clone(),
            );

            loop {
                if poller.is_shutdown() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                if !backpressure.should_accept() {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                let available_slots = backpressure.available_slots();
                if available_slots == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available_slots).await {
                    Ok(tasks) => {
                        for task in tasks {
                            let permit = match active_tasks.clone().try_acquire_owned() {
                                Ok(p) => p,
                                Err(_) => break,
                            };

                            backpressure.task_started();

                            let store = Arc::clone(&store);
                            let queue = Arc::clone(&queue);
                            let dead_letters = Arc::clone(&dead_letters);
                            let registry = Arc::clone(&registry);
                            let services = Arc::clone(&services);
                            let bp = Arc::clone(&backpressure);
                            let cancellations = Arc::clone(&cancellations);
                            let max_attempts = task.options.retry_policy.max_attempts;

                            tokio::spawn(async move {
                                let token = CancellationToken::new();
                                cancellations.lock().insert(task.claim_id, token.clone());

                                run_task(&store, &queue, &dead_letters, &registry, &services, task, max_attempts, token)
                                    .await;

                                cancellations.lock().remove(&task.claim_id);
                                bp.task_completed();
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => {
                        error!("poll error: {e}");
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("poll loop exited");
        });

        *self.poll_handle.lock().unwrap() = Some(handle);
    }

    fn start_reclaim_loop(&self) {
        let store = Arc::clone(&self.store);
        let interval = self.config.stale_reclaim_interval;
        let threshold = self.config.stale_threshold;
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.reclaim_stale(threshold).await {
                            Ok(reclaimed) => {
                                if !reclaimed.is_empty() {
                                    info!(count = reclaimed.len(), "reclaimed stale task claims");
                                }
                            }
                            Err(e) => error!("stale task reclamation failed: {e}"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("reclaim loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("reclaim loop exited");
        });

        *self.reclaim_handle.lock().unwrap() = Some(handle);
    }
}

/// Runs one claimed task to completion (§4.4 steps 3-6) and reports
/// the outcome to the target execution's queue.
async fn run_task(
    store: &Arc<dyn TaskQueueStore>,
    queue: &Arc<dyn ExecutionQueue>,
    dead_letters: &Arc<dyn DeadLetterSink>,
    registry: &Arc<TaskRegistry>,
    services: &Arc<dyn TaskServices>,
    task: ClaimedTask,
    max_attempts: u32,
    cancellation: CancellationToken,
) {
    let ctx = TaskContext::new(
        task.execution_id.clone(),
        task.seq,
        task.retry,
        max_attempts,
        task.claim_id,
        cancellation,
        services.clone(),
    );

    let Some(fut) = registry.invoke(&task.name, ctx, task.input.clone()) else {
        warn!(task_name = %task.name, "no handler registered for task type");
        report_result(
            queue,
            &task.execution_id,
            HistoryEvent::TaskFailed {
                seq: task.seq,
                error: "TaskNotFound".to_string(),
                message: format!("no task registered under name '{}'", task.name),
                timestamp: Utc::now(),
            },
        )
        .await;
        let _ = store.complete(task.claim_id).await;
        return;
    };

    match fut.await {
        Ok(TaskOutcome::Pending) => {
            // Async sentinel: the handler will report via SendTaskSuccess|Failure later.
            let _ = store.complete(task.claim_id).await;
        }
        Ok(TaskOutcome::Completed(result)) => {
            report_result(
                queue,
                &task.execution_id,
                HistoryEvent::TaskSucceeded { seq: task.seq, result, timestamp: Utc::now() },
            )
            .await;
            if let Err(e) = store.complete(task.claim_id).await {
                error!(claim_id = %task.claim_id, "failed to mark task complete: {e}");
            }
        }
        Err(task_error) => handle_task_error(store, queue, dead_letters, &task, task_error).await,
    }
}

async fn handle_task_error(
    store: &Arc<dyn TaskQueueStore>,
    queue: &Arc<dyn ExecutionQueue>,
    dead_letters: &Arc<dyn DeadLetterSink>,
    task: &ClaimedTask,
    task_error: TaskError,
) {
    if !task_error.retryable {
        let _ = store.complete(task.claim_id).await;
        report_result(
            queue,
            &task.execution_id,
            HistoryEvent::TaskFailed {
                seq: task.seq,
                error: task_error.error,
                message: task_error.message,
                timestamp: Utc::now(),
            },
        )
        .await;
        return;
    }

    match store.fail(task.claim_id, &task_error.message).await {
        Ok(TaskFailureOutcome::WillRetry { next_retry, .. }) => {
            debug!(claim_id = %task.claim_id, next_retry, "task failed, will retry");
        }
        Ok(TaskFailureOutcome::Exhausted) => {
            report_result(
                queue,
                &task.execution_id,
                HistoryEvent::TaskFailed {
                    seq: task.seq,
                    error: task_error.error.clone(),
                    message: task_error.message.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

            let entry = DeadLetterEntry {
                id: Uuid::now_v7(),
                execution_id: task.execution_id.clone(),
                seq: task.seq,
                name: task.name.clone(),
                input: task.input.clone(),
                attempts: task.retry + 1,
                error_history: vec![task_error.message],
                dead_at: Utc::now(),
            };
            if let Err(e) = dead_letters.push(entry).await {
                error!("failed to dead-letter exhausted task: {e}");
            }
        }
        Err(e) => error!(claim_id = %task.claim_id, "failed to record task failure: {e}"),
    }
}

async fn report_result(queue: &Arc<dyn ExecutionQueue>, execution_id: &crate::model::ExecutionId, event: HistoryEvent) {
    if let Err(e) = queue.enqueue(execution_id, vec![event]).await {
        error!(%execution_id, "failed to deliver task result: {e}");
    }
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
    use crate::task::Task;
    use async_trait::async_trait;

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.worker_group, "default");
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new(vec!["task_a".to_string(), "task_b".to_string()])
            .with_worker_id("test-worker")
            .with_worker_group("high-priority")
            .with_max_concurrency(20);

        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.worker_group, "high-priority");
        assert_eq!(config.task_names, vec!["task_a", "task_b"]);
        assert_eq!(config.max_concurrency, 20);
    }

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        type Input = String;
        type Output = String;

        async fn run(&self, _ctx: TaskContext, input: String) -> Result<TaskOutcome<String>, TaskError> {
            Ok(TaskOutcome::Completed(input))
        }
    }

    struct NoopServices;

    #[async_trait]
    impl TaskServices for NoopServices {
        async fn send_signal(
            &self,
            _target: crate::model::SignalTarget,
            _signal_id: &str,
            _payload: serde_json::Value,
        ) -> Result<(), crate::error::EngineError> {
            Ok(())
        }

        async fn emit_events(&self, _events: Vec<crate::model::EmittedEvent>) -> Result<(), crate::error::EngineError> {
            Ok(())
        }

        async fn start_child_workflow(
            &self,
            _workflow_name: &str,
            _execution_name: &str,
            _input: serde_json::Value,
        ) -> Result<ExecutionId, crate::error::EngineError> {
            Ok(ExecutionId::new("child", "run-1"))
        }

        async fn send_heartbeat(&self, _claim_id: Uuid) -> Result<bool, crate::error::EngineError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn claimed_task_reports_success_to_execution_queue() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = TaskRegistry::new();
        registry.register("echo", Echo);

        let pool = WorkerPool::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(registry),
            Arc::new(NoopServices),
            WorkerPoolConfig::new(vec!["echo".to_string()]).with_max_concurrency(4),
        );

        let execution_id = ExecutionId::new("wf", "run-1");
        store
            .enqueue(crate::store::TaskDispatch {
                execution_id: execution_id.clone(),
                seq: 0,
                name: "echo".to_string(),
                input: serde_json::json!("hello"),
                options: crate::model::TaskOptions::default(),
            })
            .await
            .unwrap();

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown().await.unwrap();

        let batches = store.dequeue_batch(10).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert!(matches!(batches[0].events[0], HistoryEvent::TaskSucceeded { .. }));
    }

    #[tokio::test]
    async fn unregistered_task_name_reports_task_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let registry = TaskRegistry::new();

        let pool = WorkerPool::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(registry),
            Arc::new(NoopServices),
            WorkerPoolConfig::new(vec![]).with_max_concurrency(4),
        );

        let execution_id = ExecutionId::new("wf", "run-2");
        store
            .enqueue(crate::store::TaskDispatch {
                execution_id: execution_id.clone(),
                seq: 0,
                name: "missing".to_string(),
                input: serde_json::json!(null),
                options: crate::model::TaskOptions::default(),
            })
            .await
            .unwrap();

        pool.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.shutdown().await.unwrap();

        let batches = store.dequeue_batch(10).await.unwrap();
        assert_eq!(batches.len(), 1);
        match &batches[0].events[0] {
            HistoryEvent::TaskFailed { error, .. } => assert_eq!(error, "TaskNotFound"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
