use thiserror::Error;

use crate::{chunkers::ChunkerError, providers::ProviderError, storage::StoreError};

/// Coarse error classes surfaced to callers of the public operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    InvalidParameter,
    Timeout,
    ConversionFailed,
    PreparationFailed,
    OrchestrationFailed,
    Internal,
}

#[derive(Debug, Error)]
pub enum StractError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("orchestration failed: {0}")]
    Orchestration(String),
}

impl StractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StractError::Provider(err) => err.kind(),
            StractError::Chunker(err) => err.kind(),
            StractError::Store(err) => err.kind(),
            StractError::InvalidRequest(_) => ErrorKind::InvalidParameter,
            StractError::Orchestration(_) => ErrorKind::OrchestrationFailed,
        }
    }
}

pub type StractResult<T> = Result<T, StractError>;
