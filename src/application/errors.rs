use thiserror::Error;

use crate::core::ports::{StoreError, TransportError};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer is already running")]
    AlreadyRunning,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
