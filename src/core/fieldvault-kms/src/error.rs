//! KMS error types.

use thiserror::Error;

use crate::context::Interrupted;

/// Errors that can occur while resolving providers or wrapping keys.
#[derive(Debug, Error)]
pub enum KmsError {
    /// No provider registered under this name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider configuration rejected at registration.
    #[error("invalid provider config for {provider}: {reason}")]
    InvalidProviderConfig {
        /// Provider name.
        provider: String,
        /// What is wrong.
        reason: String,
    },

    /// Credentials or trust material are missing, unreadable or rejected.
    #[error("credential error: {0}")]
    Credential(String),

    /// The KMS could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The KMS answered with something we cannot use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Deadline exceeded or operation cancelled.
    #[error("timeout: {0}")]
    Timeout(#[from] Interrupted),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] fieldvault_crypto::CryptoError),
}
