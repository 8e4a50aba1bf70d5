//! Error types for the EasyScore engine
//!
//! Storage failures are kept separate from engine failures: the engine
//! absorbs most `StorageError`s and degrades, while `EngineError`s reach
//! the caller and block destructive steps.

use crate::entry::EntryId;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type for storage tier operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors that can occur inside a storage tier
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Errors surfaced to engine callers
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Input is well-formed but semantically invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A snapshot document is not well-formed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The operation cannot run against the current library state.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No entry with id {0}")]
    UnknownEntry(EntryId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        EngineError::Parse(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        EngineError::Precondition(msg.into())
    }
}
