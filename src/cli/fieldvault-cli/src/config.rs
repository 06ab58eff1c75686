//! CLI configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use fieldvault_crypto::load_local_master_key;
use fieldvault_kms::{
    load_trust_bundle, CloudCredentials, KmsProviderConfig, KmsProviderRegistry, OperationContext,
};
use fieldvault_storage::Namespace;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the SQLite key vault.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Key vault collection, `database.collection`.
    #[serde(default = "default_key_vault_namespace")]
    pub key_vault_namespace: String,

    /// Alt-name used when a command is given none.
    #[serde(default = "default_key_alt_name")]
    pub key_alt_name: String,

    /// Name of the provider new keys are wrapped with.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Per-operation deadline; 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Named provider entries.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_key_vault_namespace() -> String {
    "encryption.__keyVault".to_string()
}

fn default_key_alt_name() -> String {
    "demo-data-key".to_string()
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// One provider entry, tagged by `type`.
///
/// Secrets are never stored in the file; entries name the environment
/// variables that hold them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderEntry {
    /// Master key read from a 96-byte file.
    Local {
        /// Path of the master key file.
        master_key_path: PathBuf,
    },
    /// Cloud KMS key.
    Cloud {
        /// Key resource name.
        key_ref: String,
        /// Key region.
        region: String,
        /// Endpoint override.
        #[serde(default)]
        endpoint: Option<String>,
        /// Variable holding the access token.
        access_token_env: String,
    },
    /// KMIP server.
    Network {
        /// `host:port` of the server.
        endpoint: String,
        /// KMIP identifier of the master secret.
        key_id: String,
        /// PEM or sealed trust bundle.
        trust_bundle_path: PathBuf,
        /// Variable holding the bundle passphrase, for sealed bundles.
        #[serde(default)]
        passphrase_env: Option<String>,
    },
}

impl ProviderEntry {
    /// Loads key material and credentials into a provider configuration.
    ///
    /// `env` resolves variable names to values.
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<KmsProviderConfig> {
        match self {
            Self::Local { master_key_path } => {
                let master_key = load_local_master_key(master_key_path).with_context(|| {
                    format!("Failed to load master key {}", master_key_path.display())
                })?;
                Ok(KmsProviderConfig::Local { master_key })
            }
            Self::Cloud {
                key_ref,
                region,
                endpoint,
                access_token_env,
            } => {
                let token = env(access_token_env)
                    .with_context(|| format!("{access_token_env} is not set"))?;
                Ok(KmsProviderConfig::Cloud {
                    key_ref: key_ref.clone(),
                    region: region.clone(),
                    endpoint: endpoint.clone(),
                    credentials: CloudCredentials::access_token(token),
                })
            }
            Self::Network {
                endpoint,
                key_id,
                trust_bundle_path,
                passphrase_env,
            } => {
                let passphrase = match passphrase_env {
                    Some(var) => Some(env(var).with_context(|| format!("{var} is not set"))?),
                    None => None,
                };
                let tls = load_trust_bundle(trust_bundle_path, passphrase.as_deref())
                    .with_context(|| {
                        format!("Failed to load trust bundle {}", trust_bundle_path.display())
                    })?;
                Ok(KmsProviderConfig::Network {
                    endpoint: endpoint.clone(),
                    tls,
                    key_id: key_id.clone(),
                })
            }
        }
    }
}

impl Config {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parses TOML configuration text.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if !config.providers.contains_key(&config.provider) {
            bail!("provider {:?} has no [providers.{}] entry", config.provider, config.provider);
        }
        Ok(config)
    }

    /// Parsed key vault namespace.
    pub fn vault_namespace(&self) -> Result<Namespace> {
        Namespace::parse(&self.key_vault_namespace)
            .with_context(|| format!("Invalid key_vault_namespace {:?}", self.key_vault_namespace))
    }

    /// Context applying the configured deadline.
    pub fn operation_context(&self) -> OperationContext {
        match self.timeout_secs {
            0 => OperationContext::new(),
            secs => OperationContext::with_timeout(Duration::from_secs(secs)),
        }
    }

    /// Resolves the selected provider.
    pub fn selected_provider(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<KmsProviderConfig> {
        let entry = self
            .providers
            .get(&self.provider)
            .with_context(|| format!("Unknown provider {:?}", self.provider))?;
        entry.resolve(env)
    }

    /// Registry holding the selected provider.
    pub fn registry(&self, env: impl Fn(&str) -> Option<String>) -> Result<KmsProviderRegistry> {
        let mut registry = KmsProviderRegistry::new();
        registry.register(self.provider.clone(), self.selected_provider(env)?)?;
        Ok(registry)
    }
}
