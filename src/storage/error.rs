//! Storage engine error types
//!
//! Defines all errors that can surface from the storage and indexing layers.
//! Consistency problems inside the index layer are never reported here; they
//! are absorbed by falling back to scans and show up only in the status.

use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying SQLite table failed
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data could not be interpreted
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Day key is not a valid `YYYYMMDD` calendar date
    #[error("Invalid day key: {0:?} (expected YYYYMMDD)")]
    InvalidDayKey(String),

    /// Range start is after range end
    #[error("Invalid day range: start {start} is after end {end}")]
    InvalidDayRange { start: String, end: String },

    /// Chunk or window sizes must be at least one day
    #[error("Invalid chunk size: {0} days")]
    InvalidChunkSize(u32),

    /// Entity id is empty or contains a reserved character
    #[error("Invalid entity id: {0:?}")]
    InvalidEntityId(String),

    /// Record fields are out of range
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Requested entity is not registered
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Requested record does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// A record with this id already exists
    #[error("Record already exists: {0}")]
    RecordExists(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// Whether this error is caused by the caller rather than the substrate
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidDayKey(_)
                | StorageError::InvalidDayRange { .. }
                | StorageError::InvalidChunkSize(_)
                | StorageError::InvalidEntityId(_)
                | StorageError::InvalidRecord(_)
                | StorageError::EntityNotFound(_)
                | StorageError::RecordNotFound(_)
                | StorageError::RecordExists(_)
        )
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
