use thiserror::Error;

use crate::providers::{ProviderError, RegistryError};

#[derive(Error, Debug)]
pub enum DialerError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DialerError>;
