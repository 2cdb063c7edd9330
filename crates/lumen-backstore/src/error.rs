//! Storage error types.

use crate::index_meta::IndexType;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested container or item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A substrate operation failed.
    #[error("storage error: {0}")]
    Internal(String),

    /// Serialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A container name or key is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The schema violates an invariant the store depends on.
    #[error("schema error: {0}")]
    Schema(String),

    /// The store could not be opened or its structural upgrade did not commit.
    #[error("initialization failed: {0}")]
    Init(String),

    /// A stored value could not be decoded into a row.
    #[error("decode error: {0}")]
    Decode(String),

    /// A write inside a transaction failed and the whole scope was discarded.
    #[error("transaction aborted: {0}")]
    TransactionAbort(String),

    /// A persisted-index container disagrees with the schema about its kind.
    #[error(
        "index metadata mismatch in '{container}': expected {expected}, found {}",
        found.map_or_else(|| "nothing".to_owned(), |t| t.to_string())
    )]
    MetadataMismatch {
        /// The persisted-index container.
        container: String,
        /// Kind declared by the schema.
        expected: IndexType,
        /// Kind found in the container, if any metadata row exists.
        found: Option<IndexType>,
    },

    /// A write was attempted through a read-only transaction.
    #[error("read-only transaction: {0}")]
    ReadOnly(String),

    /// The store handle was used before a successful `init`.
    #[error("backing store is not initialized")]
    NotInitialized,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
