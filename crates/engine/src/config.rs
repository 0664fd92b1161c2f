//! Layered engine configuration.
//!
//! Every tunable lives on an explicit config struct passed into the
//! orchestrator / task worker at construction time rather than read
//! from ambient globals (design notes, "Global mutable state"). A
//! default-constructed [`EngineConfig`] is reasonable for local
//! development and tests; [`EngineConfig::from_env`] overlays
//! recognized environment variables for deployed use.

use std::env;
use std::time::Duration;

pub use crate::timer::TimerServiceConfig;
pub use crate::worker::WorkerPoolConfig as TaskWorkerConfig;

/// Top-level configuration aggregating every component's knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub task_worker: TaskWorkerConfig,
    pub timer_service: TimerServiceConfig,
    /// `postgres://...` connection string; `None` selects the
    /// in-memory stores.
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            task_worker: TaskWorkerConfig::default(),
            timer_service: TimerServiceConfig::default(),
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from recognized environment variables, falling
    /// back to defaults for anything unset. Recognized keys:
    /// `DATABASE_URL`, `ENGINE_MAX_EVENTS_PER_RUN`,
    /// `ENGINE_WORKER_GROUP`, `ENGINE_MAX_CONCURRENCY`,
    /// `ENGINE_STALE_TASK_THRESHOLD_SECS`, `ENGINE_SHORT_TIMER_THRESHOLD_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.database_url = env::var("DATABASE_URL").ok();

        if let Ok(v) = env::var("ENGINE_MAX_EVENTS_PER_RUN") {
            if let Ok(n) = v.parse() {
                config.orchestrator.max_events_per_run = n;
            }
        }
        if let Ok(v) = env::var("ENGINE_WORKER_GROUP") {
            config.task_worker.worker_group = v;
        }
        if let Ok(v) = env::var("ENGINE_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                config.task_worker.max_concurrency = n;
            }
        }
        if let Ok(v) = env::var("ENGINE_STALE_TASK_THRESHOLD_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                config.task_worker.stale_threshold = Duration::from_secs(n);
            }
        }
        if let Ok(v) = env::var("ENGINE_SHORT_TIMER_THRESHOLD_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                config.timer_service.short_timer_threshold = Duration::from_secs(n);
            }
        }
        if let Ok(v) = env::var("ENGINE_TIMER_POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                config.timer_service.poll_interval = Duration::from_millis(n);
            }
        }

        config
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Guard against a runaway replay: a single execution may not
    /// accumulate more than this many history events.
    pub max_events_per_run: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_events_per_run: 10_000 }
    }
}

impl OrchestratorConfig {
    pub fn with_max_events_per_run(mut self, n: usize) -> Self {
        self.max_events_per_run = n;
        self
    }
}

