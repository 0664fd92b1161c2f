//! Worker pool for task execution (§4.4)
//!
//! This module provides:
//! - [`WorkerPool`] - claims dispatched tasks, resolves handlers through
//!   a [`crate::task::TaskRegistry`], and runs them to completion
//! - [`BackpressureConfig`] - load-aware task acceptance configuration
//! - [`PollerConfig`] - task polling with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │  ┌─────────────┐                    ┌─────────────────────┐  │
//! │  │ TaskPoller  │                    │  Stale Reclaimer    │  │
//! │  │  (polling)  │                    │     (30s)           │  │
//! │  └──────┬──────┘                    └─────────────────────┘  │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │              BackpressureState                       │    │
//! │  │  (high/low watermarks, load tracking)               │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Task Executor (Semaphore-limited)           │    │
//! │  │  [Task 1] [Task 2] [Task 3] ... [Task N]            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-claim heartbeating is driven by task handler code calling
//! [`crate::task::TaskContext::heartbeat`], not a pool-level timer; the
//! pool only reclaims claims that go stale without one.

mod backpressure;
mod poller;
mod pool;

pub use backpressure::{BackpressureConfig, BackpressureError, BackpressureState};
pub use poller::{AdaptivePoller, PollerConfig, PollerError, TaskPoller};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerError, WorkerPoolStatus};
