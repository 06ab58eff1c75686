//! Schema error types.

use thiserror::Error;

/// Errors that can occur while building a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Rules or key id rejected.
    #[error("schema validation failed: {0}")]
    Validation(String),
}
