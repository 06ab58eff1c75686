//! Storage error types.

use thiserror::Error;

/// Errors that can occur during key vault storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique index rejected the write.
    #[error("duplicate key in {namespace}: {key}")]
    DuplicateKey {
        /// Vault namespace.
        namespace: String,
        /// Offending key value.
        key: String,
    },

    /// An index with the same name or key exists with different options.
    #[error("index options conflict on {name}: {reason}")]
    IndexOptionsConflict {
        /// Index name.
        name: String,
        /// What differs.
        reason: String,
    },

    /// Namespace is not of the form `database.collection`.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Connection error.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Query error.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Transaction error.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
