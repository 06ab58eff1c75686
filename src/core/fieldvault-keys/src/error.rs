//! Key lifecycle error types.

use thiserror::Error;

use fieldvault_kms::{Interrupted, KmsError};
use fieldvault_storage::StorageError;

/// Errors that can occur while managing data encryption keys.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Bad or missing provider configuration or arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Another writer already holds this alt-name.
    #[error("alt-name already in use: {alt_name}")]
    UniquenessConflict {
        /// Contested alt-name.
        alt_name: String,
    },

    /// The store rejected a duplicate but the fallback read found nothing.
    #[error("key vault inconsistent: {alt_name} rejected as duplicate but not found")]
    FatalInconsistency {
        /// Contested alt-name.
        alt_name: String,
    },

    /// An incompatible index on `keyAltNames` exists. Requires an operator.
    #[error("conflicting index in {namespace}: {existing}")]
    IndexConflict {
        /// Vault namespace.
        namespace: String,
        /// Definition of the offending index.
        existing: String,
    },

    /// The index could not be created.
    #[error("index creation failed: {0}")]
    IndexCreation(String),

    /// Wrapping or inserting a new key failed.
    #[error("key creation failed: {0}")]
    KeyCreation(String),

    /// The store or KMS could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Deadline exceeded or operation cancelled.
    #[error("timeout: {0}")]
    Timeout(#[from] Interrupted),

    /// KMS error.
    #[error("kms error: {0}")]
    Kms(KmsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl KeyError {
    /// Returns true if the caller may reasonably retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KeyError::UniquenessConflict { .. } | KeyError::Transport(_) | KeyError::Timeout(_)
        )
    }
}

impl From<KmsError> for KeyError {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::Timeout(interrupted) => KeyError::Timeout(interrupted),
            KmsError::Transport(msg) => KeyError::Transport(msg),
            KmsError::UnknownProvider(_) | KmsError::InvalidProviderConfig { .. } => {
                KeyError::Configuration(e.to_string())
            }
            other => KeyError::Kms(other),
        }
    }
}

impl From<StorageError> for KeyError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ConnectionFailed(msg) => KeyError::Transport(msg),
            StorageError::InvalidNamespace(_) => KeyError::Configuration(e.to_string()),
            other => KeyError::Storage(other.to_string()),
        }
    }
}
