//! Client error types.

use thiserror::Error;

use fieldvault_kms::Interrupted;

/// Errors that can occur while building or using an encrypting client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client could not be constructed.
    #[error("client construction failed: {0}")]
    Construction(String),

    /// The driver rejected an operation.
    #[error("driver error: {0}")]
    Driver(String),

    /// Deadline exceeded or operation cancelled.
    #[error("timeout: {0}")]
    Timeout(#[from] Interrupted),
}
