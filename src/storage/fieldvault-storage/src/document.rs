//! Key vault document model.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageError;

/// Size of a key identifier in bytes.
pub const KEY_ID_SIZE: usize = 16;

/// Field holding the alt-names of a key document.
pub const KEY_ALT_NAMES_FIELD: &str = "keyAltNames";

/// 16-byte key identifier (UUID v4 bytes), displayed as standard base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId([u8; KEY_ID_SIZE]);

impl KeyId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Creates an identifier from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StorageError> {
        let arr: [u8; KEY_ID_SIZE] = bytes.try_into().map_err(|_| {
            StorageError::InvalidInput(format!(
                "key id must be {KEY_ID_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parses the base64 display form.
    pub fn from_base64(encoded: &str) -> Result<Self, StorageError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| StorageError::InvalidInput(format!("invalid key id base64: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_ID_SIZE] {
        &self.0
    }

    /// Standard base64 encoding of the identifier.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_base64())
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_base64(&raw).map_err(serde::de::Error::custom)
    }
}

/// Where the master key that wraps a DEK lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyDescriptor {
    /// Registered provider name (the key used by field schemas and registries).
    pub provider: String,
    /// Provider-specific location of the master key.
    #[serde(flatten)]
    pub location: MasterKeyLocation,
}

/// Provider-specific master key location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MasterKeyLocation {
    /// Key bytes supplied directly by the caller.
    Local,
    /// Cloud KMS key reference.
    Cloud {
        /// Key resource name.
        key: String,
        /// Region or location of the key.
        region: String,
        /// Endpoint override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    /// Network-attached (KMIP) secret.
    Network {
        /// KMIP unique identifier of the secret.
        #[serde(rename = "keyId")]
        key_id: String,
        /// `host:port` of the KMIP server.
        endpoint: String,
    },
}

/// A data encryption key as stored in the key vault collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDocument {
    /// Key identifier.
    #[serde(rename = "_id")]
    pub id: KeyId,
    /// Alt-names (unique across the vault, case-sensitive).
    pub key_alt_names: Vec<String>,
    /// Wrapped DEK material.
    #[serde(with = "base64_bytes")]
    pub key_material: Vec<u8>,
    /// Master key that wrapped `key_material`.
    pub master_key: MasterKeyDescriptor,
    /// Creation timestamp (Unix seconds).
    pub creation_date: u64,
    /// Last update timestamp (Unix seconds).
    pub update_date: u64,
    /// Key status (0 = active).
    pub status: i32,
}

impl KeyDocument {
    /// Returns true if `alt_name` is one of this key's alt-names.
    pub fn has_alt_name(&self, alt_name: &str) -> bool {
        self.key_alt_names.iter().any(|n| n == alt_name)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Partial filter expression of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartialFilter {
    /// Only documents where the field exists are indexed.
    Exists(String),
}

/// A single-field secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Indexed field.
    pub field: String,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Partial filter expression.
    pub partial_filter: Option<PartialFilter>,
}

impl IndexDefinition {
    /// The unique partial index on `keyAltNames` every key vault requires.
    pub fn key_alt_names() -> Self {
        Self {
            name: format!("{KEY_ALT_NAMES_FIELD}_1"),
            field: KEY_ALT_NAMES_FIELD.to_string(),
            unique: true,
            partial_filter: Some(PartialFilter::Exists(KEY_ALT_NAMES_FIELD.to_string())),
        }
    }

    /// Returns true if this index enforces uniqueness of alt-names.
    pub fn enforces_unique_alt_names(&self) -> bool {
        self.unique && self.field == KEY_ALT_NAMES_FIELD
    }
}
