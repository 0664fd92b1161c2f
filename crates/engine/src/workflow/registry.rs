use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::WorkflowContext;
use super::error::WorkflowError;

type BoxedOutput = Pin<Box<dyn Future<Output = Result<serde_json::Value, WorkflowError>>>>;
type BoxedRunner = Box<dyn Fn(WorkflowContext, serde_json::Value) -> BoxedOutput>;

/// Maps a workflow name to its type-erased entry point. One runner is
/// kept per registered workflow; the orchestrator resolves `name` to a
/// runner once per run and drives it to its next suspension point.
#[derive(Default)]
pub struct WorkflowRegistry {
    runners: HashMap<String, BoxedRunner>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow entry point `fn(ctx, input) -> impl Future<Output = Result<O, WorkflowError>>`.
    pub fn register<I, O, F, Fut>(&mut self, name: impl Into<String>, entry_point: F)
    where
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
        F: Fn(WorkflowContext, I) -> Fut + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + 'static,
    {
        let runner: BoxedRunner = Box::new(move |ctx, input_json| {
            let parsed = serde_json::from_value::<I>(input_json);
            let fut = entry_point;
            Box::pin(async move {
                let input = parsed
                    .map_err(|e| WorkflowError::new(format!("invalid workflow input: {e}")).with_code("InvalidInput"))?;
                let output = fut(ctx, input).await?;
                serde_json::to_value(output)
                    .map_err(|e| WorkflowError::new(format!("unserializable workflow output: {e}")))
            })
        });
        self.runners.insert(name.into(), runner);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    pub(crate) fn invoke(
        &self,
        name: &str,
        ctx: WorkflowContext,
        input: serde_json::Value,
    ) -> Option<BoxedOutput> {
        self.runners.get(name).map(|runner| runner(ctx, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use crate::model::ExecutionId;
    use crate::workflow::context::ContextState;

    fn blank_context() -> WorkflowContext {
        WorkflowContext::new(Rc::new(RefCell::new(ContextState::new(
            VecDeque::new(),
            chrono::Utc::now(),
            ExecutionId::new("greet", "run-1"),
            "greet".into(),
            None,
        ))))
    }

    #[tokio::test]
    async fn registered_workflow_round_trips_input_and_output() {
        let mut registry = WorkflowRegistry::new();
        registry.register("greet", |_ctx, name: String| async move {
            Ok::<_, WorkflowError>(format!("hello {name}"))
        });

        let fut = registry
            .invoke("greet", blank_context(), serde_json::json!("world"))
            .expect("workflow should be registered");
        let output = fut.await.unwrap();
        assert_eq!(output, serde_json::json!("hello world"));
    }

    #[test]
    fn unknown_workflow_name_returns_none() {
        let registry = WorkflowRegistry::new();
        assert!(registry.invoke("missing", blank_context(), serde_json::json!(null)).is_none());
    }
}
