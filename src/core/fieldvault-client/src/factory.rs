//! Encrypting client factory.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use fieldvault_kms::{KmsProviderConfig, OperationContext};
use fieldvault_schema::CollectionSchema;
use fieldvault_storage::Namespace;

use crate::driver::{AutoEncryptionOptions, DocumentDriver, DriverSession};
use crate::error::ClientError;
use crate::helper::{EncryptionHelper, HelperOptions};

/// Builds [`EncryptingClientHandle`]s bound to one key vault.
pub struct EncryptingClientFactory {
    vault_namespace: Namespace,
    driver: Arc<dyn DocumentDriver>,
    helper: Arc<dyn EncryptionHelper>,
    helper_options: HelperOptions,
}

impl EncryptingClientFactory {
    /// Creates a factory with default helper options.
    pub fn new(
        vault_namespace: Namespace,
        driver: Arc<dyn DocumentDriver>,
        helper: Arc<dyn EncryptionHelper>,
    ) -> Self {
        Self {
            vault_namespace,
            driver,
            helper,
            helper_options: HelperOptions::default(),
        }
    }

    /// Overrides the helper options.
    pub fn with_helper_options(mut self, options: HelperOptions) -> Self {
        self.helper_options = options;
        self
    }

    /// Connects an auto-encrypting session to `target`.
    ///
    /// Unless `bypass_spawn` is set, the encryption helper must be reachable
    /// (or spawnable) first.
    pub async fn build(
        &self,
        target: &str,
        provider_name: &str,
        provider_config: &KmsProviderConfig,
        schema: &CollectionSchema,
        ctx: &OperationContext,
    ) -> Result<EncryptingClientHandle, ClientError> {
        if target.trim().is_empty() {
            return Err(ClientError::Construction("connection target cannot be empty".into()));
        }
        provider_config
            .validate(provider_name)
            .map_err(|e| ClientError::Construction(e.to_string()))?;

        if !self.helper_options.bypass_spawn {
            ctx.run(self.helper.ensure_reachable(&self.helper_options))
                .await??;
        }

        let options = AutoEncryptionOptions {
            key_vault_namespace: self.vault_namespace.clone(),
            provider_name: provider_name.to_string(),
            provider: provider_config.clone(),
            schema: schema.clone(),
            helper: self.helper_options.clone(),
        };

        let session = ctx
            .run(self.driver.connect(target, options))
            .await?
            .map_err(|e| match e {
                ClientError::Driver(msg) => ClientError::Construction(msg),
                other => other,
            })?;

        info!(
            key_vault = %self.vault_namespace,
            provider = provider_name,
            bypass_spawn = self.helper_options.bypass_spawn,
            "Encrypting client ready"
        );

        Ok(EncryptingClientHandle {
            session,
            ctx: ctx.clone(),
        })
    }
}

/// Insert and find passthroughs to an auto-encrypting session.
pub struct EncryptingClientHandle {
    session: Box<dyn DriverSession>,
    ctx: OperationContext,
}

impl EncryptingClientHandle {
    /// Inserts one document; encryption is done by the driver.
    pub async fn insert_one(&self, ns: &Namespace, document: Value) -> Result<(), ClientError> {
        self.ctx.run(self.session.insert_one(ns, document)).await?
    }

    /// Finds one document; decryption is done by the driver.
    pub async fn find_one(
        &self,
        ns: &Namespace,
        filter: Value,
    ) -> Result<Option<Value>, ClientError> {
        self.ctx.run(self.session.find_one(ns, filter)).await?
    }
}
