//! Named provider registry.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::KmsError;
use crate::provider::KmsProviderConfig;
use crate::wrap::KeyWrapper;

/// In-memory map of provider name to configuration.
///
/// Registering a name again replaces the previous configuration.
#[derive(Debug, Clone, Default)]
pub struct KmsProviderRegistry {
    providers: BTreeMap<String, KmsProviderConfig>,
}

impl KmsProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a provider configuration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        config: KmsProviderConfig,
    ) -> Result<(), KmsError> {
        let name = name.into();
        config.validate(&name)?;

        debug!(provider = %name, kind = %config.kind(), "Provider registered");
        self.providers.insert(name, config);
        Ok(())
    }

    /// Looks up a provider by name.
    pub fn resolve(&self, name: &str) -> Result<&KmsProviderConfig, KmsError> {
        self.providers
            .get(name)
            .ok_or_else(|| KmsError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Builds the key wrapper for a registered provider.
    pub fn wrapper_for(&self, name: &str) -> Result<Box<dyn KeyWrapper>, KmsError> {
        self.resolve(name)?.wrapper(name)
    }
}
