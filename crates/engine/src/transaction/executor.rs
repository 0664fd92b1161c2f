use std::sync::Arc;

use tracing::instrument;

use crate::model::EmittedEvent;
use crate::reliability::RetryPolicy;
use crate::store::EntityStore;

use super::context::TransactionContext;
use super::error::TransactionError;
use super::registry::TransactionRegistry;

/// Outcome of running a transaction to completion (§4.7 step 3/4).
pub enum TransactionOutcome {
    Succeeded {
        output: serde_json::Value,
        events: Vec<EmittedEvent>,
    },
    Failed {
        error: String,
        message: String,
    },
}

/// Runs `name` against `input`, retrying on optimistic-commit conflicts
/// up to `retry_policy.max_attempts` (the spec calls this `maxRetries = 100`).
/// Events the function emitted are only returned once the commit succeeds.
#[instrument(skip(registry, store, retry_policy, input), fields(transaction = %name))]
pub async fn run(
    registry: &TransactionRegistry,
    store: Arc<dyn EntityStore>,
    name: &str,
    input: serde_json::Value,
    retry_policy: &RetryPolicy,
) -> TransactionOutcome {
    if !registry.contains(name) {
        return TransactionOutcome::Failed {
            error: "TransactionNotFound".to_string(),
            message: format!("no transaction registered under name '{name}'"),
        };
    }

    let ctx = TransactionContext::new(store.clone());
    let mut attempt = 1u32;

    loop {
        let fut = registry
            .invoke(name, ctx.clone(), input.clone())
            .expect("presence checked above");

        let output = match fut.await {
            Ok(output) => output,
            Err(TransactionError::User { error, message }) => {
                return TransactionOutcome::Failed { error, message }
            }
            Err(other) => {
                return TransactionOutcome::Failed {
                    error: "TransactionError".to_string(),
                    message: other.to_string(),
                }
            }
        };

        let (reads, writes, events) = ctx.take_log();

        if writes.is_empty() {
            return TransactionOutcome::Succeeded { output, events };
        }

        match store.commit_if_unchanged(&reads, &writes).await {
            Ok(true) => return TransactionOutcome::Succeeded { output, events },
            Ok(false) => {
                if !retry_policy.has_attempts_remaining(attempt) {
                    return TransactionOutcome::Failed {
                        error: "TransactionRetriesExhausted".to_string(),
                        message: format!("gave up after {attempt} attempts due to write conflicts"),
                    };
                }
                attempt += 1;
                ctx.reset();
                tokio::time::sleep(retry_policy.delay_for_attempt(attempt)).await;
            }
            Err(e) => {
                return TransactionOutcome::Failed {
                    error: "StoreError".to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}
