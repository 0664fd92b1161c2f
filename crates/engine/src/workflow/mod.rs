//! The workflow executor: a single-threaded cooperative coroutine
//! driven by replaying history against ordinary `async`/`.await` code.
//!
//! Workflow functions are registered in a [`WorkflowRegistry`] and run
//! against a [`WorkflowContext`], whose `task`/`timer`/`child_workflow`/
//! etc. methods return [`Eventual`]s — futures that resolve only when
//! [`replay::run`] feeds them the matching result event. There is no
//! tokio runtime underneath a workflow run: `replay::run` polls the
//! top-level future by hand with a no-op waker, since progress is
//! driven entirely by draining history rather than by I/O readiness.

mod combinators;
mod context;
mod error;
mod registry;
mod replay;

pub use combinators::{all, all_settled, any, race};
pub use context::{Eventual, WorkflowContext};
pub use error::WorkflowError;
pub use registry::WorkflowRegistry;
pub use replay::{
    run, synthesize_condition_timeouts, synthesize_signal_deliveries, synthesize_signal_timeouts,
    synthesize_timer_completions, RunOutcome,
};
