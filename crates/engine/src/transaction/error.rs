use thiserror::Error;

use crate::model::ExecutionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("no transaction registered under name '{0}'")]
    TransactionNotFound(String),

    #[error("transaction exhausted its retry budget after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{error}: {message}")]
    User { error: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransactionError {
    pub fn user(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::User {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl From<TransactionError> for ExecutionError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::User { error, message } => ExecutionError::new(error, message),
            TransactionError::TransactionNotFound(name) => {
                ExecutionError::new("TransactionNotFound", format!("no transaction registered under name '{name}'"))
            }
            TransactionError::RetriesExhausted { attempts } => ExecutionError::new(
                "TransactionRetriesExhausted",
                format!("gave up after {attempts} attempts"),
            ),
            other => ExecutionError::new("TransactionError", other.to_string()),
        }
    }
}
