use serde::de::DeserializeOwned;

use crate::model::ExecutionError;

use super::context::Eventual;

/// Resolves once every eventual has succeeded, in the original order.
/// Fails as soon as the first one fails (remaining eventuals are left
/// unresolved in this run; a later replay will pick them up once their
/// result events land in history).
pub async fn all<T: DeserializeOwned>(
    eventuals: Vec<Eventual<T>>,
) -> Result<Vec<T>, ExecutionError> {
    futures::future::join_all(eventuals)
        .await
        .into_iter()
        .collect()
}

/// Resolves once every eventual has settled, success or failure.
pub async fn all_settled<T: DeserializeOwned>(
    eventuals: Vec<Eventual<T>>,
) -> Vec<Result<T, ExecutionError>> {
    futures::future::join_all(eventuals).await
}

/// Resolves with the first eventual to succeed. If every eventual
/// fails, resolves with the last failure observed.
pub async fn any<T: DeserializeOwned>(
    eventuals: Vec<Eventual<T>>,
) -> Result<T, ExecutionError> {
    let mut pending = eventuals;
    let mut last_err = ExecutionError::new("AnyExhausted", "no eventuals were provided to any()");
    while !pending.is_empty() {
        let (result, _index, rest) = futures::future::select_all(pending).await;
        match result {
            Ok(value) => return Ok(value),
            Err(err) => last_err = err,
        }
        pending = rest;
    }
    Err(last_err)
}

/// Resolves with whichever eventual settles first, success or failure.
pub async fn race<T: DeserializeOwned>(eventuals: Vec<Eventual<T>>) -> Result<T, ExecutionError> {
    let (result, _index, _rest) = futures::future::select_all(eventuals).await;
    result
}
