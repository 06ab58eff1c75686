//! Seam to the document driver.

use async_trait::async_trait;
use serde_json::Value;

use fieldvault_kms::KmsProviderConfig;
use fieldvault_schema::CollectionSchema;
use fieldvault_storage::Namespace;

use crate::error::ClientError;
use crate::helper::HelperOptions;

/// Everything the driver needs to encrypt and decrypt automatically.
#[derive(Debug, Clone)]
pub struct AutoEncryptionOptions {
    /// Key vault collection.
    pub key_vault_namespace: Namespace,
    /// Provider name referenced by the key documents.
    pub provider_name: String,
    /// Provider configuration.
    pub provider: KmsProviderConfig,
    /// Encryption schema map.
    pub schema: CollectionSchema,
    /// Encryption helper settings.
    pub helper: HelperOptions,
}

/// A driver able to open auto-encrypting sessions.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    /// Connects to `target` with auto-encryption enabled.
    async fn connect(
        &self,
        target: &str,
        options: AutoEncryptionOptions,
    ) -> Result<Box<dyn DriverSession>, ClientError>;
}

/// An open auto-encrypting session.
#[async_trait]
pub trait DriverSession: Send + Sync {
    /// Inserts one document.
    async fn insert_one(&self, ns: &Namespace, document: Value) -> Result<(), ClientError>;

    /// Returns the first document matching `filter`.
    async fn find_one(&self, ns: &Namespace, filter: Value) -> Result<Option<Value>, ClientError>;
}
