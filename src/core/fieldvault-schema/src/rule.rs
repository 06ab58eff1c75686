//! Field encryption rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// BSON type of an encrypted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BsonType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Double.
    Double,
    /// Decimal128.
    Decimal,
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
    /// UTC datetime.
    Date,
    /// ObjectId.
    ObjectId,
    /// Binary data.
    BinData,
    /// Array.
    Array,
    /// Embedded document.
    Object,
}

impl BsonType {
    /// Schema token for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::ObjectId => "objectId",
            Self::BinData => "binData",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether deterministic encryption may be applied to this type.
    pub fn allows_deterministic(&self) -> bool {
        !matches!(
            self,
            Self::Double | Self::Decimal | Self::Bool | Self::Array | Self::Object
        )
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BsonType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "decimal" => Ok(Self::Decimal),
            "string" => Ok(Self::String),
            "bool" => Ok(Self::Bool),
            "date" => Ok(Self::Date),
            "objectId" => Ok(Self::ObjectId),
            "binData" => Ok(Self::BinData),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            _ => Err(SchemaError::Validation(format!("unknown bson type: {s}"))),
        }
    }
}

/// Field encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Same plaintext and key give the same ciphertext; supports equality queries.
    Deterministic,
    /// Fresh ciphertext on every encryption.
    Random,
}

impl Algorithm {
    /// Schema token for this algorithm.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Deterministic => "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic",
            Self::Random => "AEAD_AES_256_CBC_HMAC_SHA_512-Random",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One encrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEncryptionRule {
    /// Field name within its enclosing object.
    pub field_path: String,
    /// Declared BSON type.
    pub bson_type: BsonType,
    /// Encryption algorithm.
    pub algorithm: Algorithm,
}

impl FieldEncryptionRule {
    /// Creates a rule.
    pub fn new(field_path: impl Into<String>, bson_type: BsonType, algorithm: Algorithm) -> Self {
        Self {
            field_path: field_path.into(),
            bson_type,
            algorithm,
        }
    }
}

/// A schema property: an encrypted field or a nested object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// Encrypt this field.
    Encrypt(FieldEncryptionRule),
    /// Descend into an embedded document.
    Object {
        /// Field name of the embedded document.
        field: String,
        /// Rules for its fields, in order.
        properties: Vec<FieldRule>,
    },
}

impl FieldRule {
    /// Deterministically encrypted field.
    pub fn deterministic(field: impl Into<String>, bson_type: BsonType) -> Self {
        Self::Encrypt(FieldEncryptionRule::new(
            field,
            bson_type,
            Algorithm::Deterministic,
        ))
    }

    /// Randomly encrypted field.
    pub fn random(field: impl Into<String>, bson_type: BsonType) -> Self {
        Self::Encrypt(FieldEncryptionRule::new(field, bson_type, Algorithm::Random))
    }

    /// Nested object.
    pub fn object(field: impl Into<String>, properties: Vec<FieldRule>) -> Self {
        Self::Object {
            field: field.into(),
            properties,
        }
    }

    /// Field name of this rule.
    pub fn field(&self) -> &str {
        match self {
            Self::Encrypt(rule) => &rule.field_path,
            Self::Object { field, .. } => field,
        }
    }
}
