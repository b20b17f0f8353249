//! Error taxonomy for the adaptation pipeline
//!
//! Storage failures are recoverable and normally logged where they occur.
//! `NotFound` and `NoCurrentLayout` are call-ordering mistakes and are
//! returned to the caller.

use thiserror::Error;

/// Failure inside a storage backend or its key/value substrate
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the tracker, layout store and rule engine
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("layout `{0}` not found")]
    NotFound(String),
    #[error("no current layout is set")]
    NoCurrentLayout,
}

pub type AdaptResult<T> = std::result::Result<T, AdaptError>;
