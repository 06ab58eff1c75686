//! KMS provider configurations.

use std::collections::BTreeMap;
use std::fmt;

use fieldvault_crypto::LocalMasterKey;
use fieldvault_storage::{MasterKeyDescriptor, MasterKeyLocation};

use crate::cloud::CloudWrapper;
use crate::error::KmsError;
use crate::kmip::KmipWrapper;
use crate::trust_bundle::TrustBundle;
use crate::wrap::{KeyWrapper, LocalWrapper};

/// Credential field holding the bearer token for cloud KMS calls.
pub const ACCESS_TOKEN: &str = "accessToken";

/// Kind of KMS backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Caller-held master key.
    Local,
    /// Cloud KMS over HTTPS.
    Cloud,
    /// KMIP server over mutual TLS.
    Network,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Opaque cloud credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CloudCredentials {
    values: BTreeMap<String, String>,
}

impl CloudCredentials {
    /// Empty credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials carrying only a bearer token.
    pub fn access_token(token: impl Into<String>) -> Self {
        Self::new().with(ACCESS_TOKEN, token)
    }

    /// Adds or replaces a credential field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Looks up a credential field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The bearer token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.get(ACCESS_TOKEN).filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.values.keys() {
            map.entry(key, &"[REDACTED]");
        }
        map.finish()
    }
}

/// Configuration of one named KMS provider.
#[derive(Debug, Clone)]
pub enum KmsProviderConfig {
    /// 96-byte master key supplied directly.
    Local {
        /// Master key bytes.
        master_key: LocalMasterKey,
    },
    /// Cloud KMS key.
    Cloud {
        /// Key resource name.
        key_ref: String,
        /// Region or location of the key.
        region: String,
        /// Endpoint override (defaults to the public KMS endpoint).
        endpoint: Option<String>,
        /// Opaque credentials.
        credentials: CloudCredentials,
    },
    /// KMIP server holding the master secret.
    Network {
        /// `host:port` of the KMIP server.
        endpoint: String,
        /// Trust and client-certificate material.
        tls: TrustBundle,
        /// KMIP unique identifier of the master secret.
        key_id: String,
    },
}

impl KmsProviderConfig {
    /// Local provider from raw master key bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProviderConfig` unless `bytes` is exactly 96 bytes long.
    pub fn local(bytes: &[u8]) -> Result<Self, KmsError> {
        let master_key =
            LocalMasterKey::from_bytes(bytes).map_err(|e| KmsError::InvalidProviderConfig {
                provider: ProviderKind::Local.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::Local { master_key })
    }

    /// Returns the backend kind.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Local { .. } => ProviderKind::Local,
            Self::Cloud { .. } => ProviderKind::Cloud,
            Self::Network { .. } => ProviderKind::Network,
        }
    }

    /// Checks the configuration shape.
    ///
    /// Local keys are validated by [`LocalMasterKey`] at construction. Cloud
    /// credentials are opaque here; the wrapper checks them when built.
    pub fn validate(&self, name: &str) -> Result<(), KmsError> {
        let invalid = |reason: &str| KmsError::InvalidProviderConfig {
            provider: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("provider name cannot be empty"));
        }

        match self {
            Self::Local { .. } => Ok(()),
            Self::Cloud { key_ref, .. } => {
                if key_ref.trim().is_empty() {
                    return Err(invalid("key_ref cannot be empty"));
                }
                Ok(())
            }
            Self::Network {
                endpoint, key_id, ..
            } => {
                parse_host_port(endpoint).map_err(|reason| invalid(&reason))?;
                if key_id.trim().is_empty() {
                    return Err(invalid("key_id cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Describes where the master key of this provider lives.
    pub fn descriptor(&self, name: &str) -> MasterKeyDescriptor {
        let location = match self {
            Self::Local { .. } => MasterKeyLocation::Local,
            Self::Cloud {
                key_ref,
                region,
                endpoint,
                ..
            } => MasterKeyLocation::Cloud {
                key: key_ref.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
            },
            Self::Network {
                endpoint, key_id, ..
            } => MasterKeyLocation::Network {
                key_id: key_id.clone(),
                endpoint: endpoint.clone(),
            },
        };

        MasterKeyDescriptor {
            provider: name.to_string(),
            location,
        }
    }

    /// Builds the key wrapper for this provider.
    pub fn wrapper(&self, name: &str) -> Result<Box<dyn KeyWrapper>, KmsError> {
        self.validate(name)?;

        let wrapper: Box<dyn KeyWrapper> = match self {
            Self::Local { master_key } => Box::new(LocalWrapper::new(
                self.descriptor(name),
                master_key.clone(),
            )),
            Self::Cloud {
                key_ref,
                endpoint,
                credentials,
                ..
            } => Box::new(CloudWrapper::new(
                self.descriptor(name),
                key_ref,
                endpoint.as_deref(),
                credentials,
            )?),
            Self::Network {
                endpoint,
                tls,
                key_id,
            } => Box::new(KmipWrapper::new(
                self.descriptor(name),
                endpoint,
                tls.clone(),
                key_id,
            )?),
        };

        Ok(wrapper)
    }
}

/// Splits `host:port`, rejecting empty hosts and invalid ports.
pub(crate) fn parse_host_port(endpoint: &str) -> Result<(&str, u16), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("endpoint {endpoint:?} must be host:port"))?;

    if host.is_empty() {
        return Err(format!("endpoint {endpoint:?} has an empty host"));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("endpoint {endpoint:?} has an invalid port")),
        Ok(port) => Ok((host, port)),
    }
}
