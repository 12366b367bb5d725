use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PineResult<T> = Result<T, PineError>;

#[derive(Error, Debug)]
pub enum PineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate key: {0}")]
    DuplicateKey(i64),

    #[error("Validation error on column '{column}': {reason}")]
    Validation { column: String, reason: String },

    #[error("Corrupt metadata for table '{table}': {reason}")]
    CorruptMetadata { table: String, reason: String },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request too large: {0} bytes")]
    RequestTooLarge(usize),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PineError {
    pub(crate) fn validation(column: impl Into<String>, reason: impl Into<String>) -> Self {
        PineError::Validation {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(table: impl Into<String>, reason: impl Into<String>) -> Self {
        PineError::CorruptMetadata {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Coarse classification carried back to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PineError::Io(_) => ErrorKind::Io,
            PineError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            PineError::Validation { .. } => ErrorKind::Validation,
            PineError::CorruptMetadata { .. } => ErrorKind::CorruptMetadata,
            PineError::TableNotFound(_) => ErrorKind::TableNotFound,
            PineError::TableExists(_) => ErrorKind::TableExists,
            PineError::InvalidInput(_) | PineError::Serialization(_) => ErrorKind::InvalidInput,
            PineError::Protocol(_) | PineError::RequestTooLarge(_) => ErrorKind::InvalidRequest,
            PineError::TooManyRequests => ErrorKind::TooManyRequests,
            PineError::Connection(_) | PineError::Timeout => ErrorKind::Connection,
            PineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Io,
    DuplicateKey,
    Validation,
    CorruptMetadata,
    TableNotFound,
    TableExists,
    InvalidInput,
    InvalidRequest,
    TooManyRequests,
    Connection,
    Internal,
}

impl From<serde_json::Error> for PineError {
    fn from(e: serde_json::Error) -> Self {
        PineError::Serialization(e.to_string())
    }
}
