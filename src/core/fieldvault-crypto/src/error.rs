//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur while handling key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key source yielded fewer bytes than required.
    #[error("insufficient key material: expected {expected} bytes, got {actual}")]
    InsufficientKeyMaterial {
        /// Required number of bytes.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing key material failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
