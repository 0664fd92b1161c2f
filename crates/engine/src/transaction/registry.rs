use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::TransactionContext;
use super::error::TransactionError;

type BoxedOutput = Pin<Box<dyn Future<Output = Result<serde_json::Value, TransactionError>> + Send>>;
type BoxedFn = Box<dyn Fn(TransactionContext, serde_json::Value) -> BoxedOutput + Send + Sync>;

#[derive(Default)]
pub struct TransactionRegistry {
    functions: HashMap<String, BoxedFn>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, O, F, Fut>(&mut self, name: impl Into<String>, function: F)
    where
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
        F: Fn(TransactionContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TransactionError>> + Send + 'static,
    {
        let function = Arc::new(function);
        let boxed: BoxedFn = Box::new(move |ctx, input_json| {
            let function = function.clone();
            Box::pin(async move {
                let input: I = serde_json::from_value(input_json).map_err(TransactionError::Serialization)?;
                let output = function(ctx, input).await?;
                serde_json::to_value(output).map_err(TransactionError::Serialization)
            })
        });
        self.functions.insert(name.into(), boxed);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(crate) fn invoke(
        &self,
        name: &str,
        ctx: TransactionContext,
        input: serde_json::Value,
    ) -> Option<BoxedOutput> {
        self.functions.get(name).map(|f| f(ctx, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn registered_transaction_can_read_and_write_entities() {
        let mut registry = TransactionRegistry::new();
        registry.register("deposit", |ctx: TransactionContext, amount: i64| async move {
            let balance: i64 = ctx.get("acct-1").await.map_err(|e| e)?.unwrap_or(0);
            ctx.set("acct-1", balance + amount)?;
            Ok::<_, TransactionError>(balance + amount)
        });

        let store: Arc<dyn crate::store::EntityStore> = Arc::new(InMemoryStore::new());
        let ctx = TransactionContext::new(store);
        let fut = registry.invoke("deposit", ctx, serde_json::json!(50)).unwrap();
        let result = fut.await.unwrap();
        assert_eq!(result, serde_json::json!(50));
    }

    #[test]
    fn unknown_transaction_name_returns_none() {
        let registry = TransactionRegistry::new();
        let store: Arc<dyn crate::store::EntityStore> = Arc::new(InMemoryStore::new());
        let ctx = TransactionContext::new(store);
        assert!(registry.invoke("missing", ctx, serde_json::json!(null)).is_none());
    }
}
