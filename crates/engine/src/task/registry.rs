use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::TaskContext;
use super::error::TaskError;
use super::outcome::TaskOutcome;

/// A task handler, resolved by name from the `TaskRegistry` (§4.4 step
/// 3). Implementors run on the worker pool's tokio runtime, so unlike
/// [`crate::workflow::WorkflowContext`] this is an ordinary `Send` trait.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(
        &self,
        ctx: TaskContext,
        input: Self::Input,
    ) -> Result<TaskOutcome<Self::Output>, TaskError>;
}

type BoxedOutput = Pin<Box<dyn Future<Output = Result<TaskOutcome<serde_json::Value>, TaskError>> + Send>>;
type BoxedHandler = Box<dyn Fn(TaskContext, serde_json::Value) -> BoxedOutput + Send + Sync>;

#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task>(&mut self, name: impl Into<String>, task: T) {
        let task = Arc::new(task);
        let handler: BoxedHandler = Box::new(move |ctx, input_json| {
            let task = task.clone();
            Box::pin(async move {
                let input: T::Input = serde_json::from_value(input_json).map_err(|e| {
                    TaskError::non_retryable("InvalidTaskInput", e.to_string())
                })?;
                let outcome = task.run(ctx, input).await?;
                match outcome {
                    TaskOutcome::Completed(output) => {
                        let value = serde_json::to_value(output).map_err(|e| {
                            TaskError::non_retryable("UnserializableTaskOutput", e.to_string())
                        })?;
                        Ok(TaskOutcome::Completed(value))
                    }
                    TaskOutcome::Pending => Ok(TaskOutcome::Pending),
                }
            })
        });
        self.handlers.insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn invoke(&self, name: &str, ctx: TaskContext, input: serde_json::Value) -> Option<BoxedOutput> {
        self.handlers.get(name).map(|handler| handler(ctx, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionId;

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        type Input = String;
        type Output = String;

        async fn run(
            &self,
            _ctx: TaskContext,
            input: String,
        ) -> Result<TaskOutcome<String>, TaskError> {
            Ok(TaskOutcome::Completed(input))
        }
    }

    struct NoopServices;

    #[async_trait]
    impl crate::task::context::TaskServices for NoopServices {
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

        async fn send_heartbeat(&self, _claim_id: uuid::Uuid) -> Result<bool, crate::error::EngineError> {
            Ok(false)
        }
    }

    fn context() -> TaskContext {
        TaskContext::new(
            ExecutionId::new("wf", "run-1"),
            0,
            0,
            1,
            uuid::Uuid::now_v7(),
            tokio_util::sync::CancellationToken::new(),
            Arc::new(NoopServices),
        )
    }

    #[tokio::test]
    async fn registered_task_round_trips_input_and_output() {
        let mut registry = TaskRegistry::new();
        registry.register("echo", Echo);
        let fut = registry
            .invoke("echo", context(), serde_json::json!("hi"))
            .expect("task should be registered");
        let outcome = fut.await.unwrap();
        match outcome {
            TaskOutcome::Completed(value) => assert_eq!(value, serde_json::json!("hi")),
            TaskOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn unknown_task_name_returns_none() {
        let registry = TaskRegistry::new();
        assert!(registry.invoke("missing", context(), serde_json::json!(null)).is_none());
    }
}
