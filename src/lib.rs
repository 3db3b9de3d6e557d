use thiserror::Error;

use crate::dispatcher::protocol::ErrorKind;

pub type Result<T> = std::result::Result<T, DocchatError>;

#[derive(Error, Debug)]
pub enum DocchatError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background worker failed ({kind}): {message}")]
    Worker { kind: ErrorKind, message: String },

    #[error("Background worker stopped before answering")]
    WorkerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl DocchatError {
    /// Wire-level classification of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::Worker { kind, .. } => *kind,
            Self::Config(_) | Self::WorkerStopped | Self::Io(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<sqlx::Error> for DocchatError {
    #[inline]
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DocchatError {
    #[inline]
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StorageUnavailable(format!("schema migration failed: {}", err))
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod embeddings;
pub mod retrieval;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;
