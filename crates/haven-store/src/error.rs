//! Error types for the durable store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by store operations. "Not found" is never an error:
/// read accessors return `Ok(None)` for missing keys.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying database could not be opened or accessed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write or multi-key transaction failed to commit.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A backup document could not be parsed.
    #[error("invalid backup format: {0}")]
    InvalidBackupFormat(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => StoreError::StorageUnavailable(e.to_string()),
            e @ sled::Error::Corruption { .. } => {
                StoreError::StorageUnavailable(format!("corruption: {e}"))
            }
            other => StoreError::TransactionFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::TransactionFailed(format!("value encoding: {err}"))
    }
}
