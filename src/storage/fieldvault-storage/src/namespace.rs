//! Collection namespaces (`database.collection`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageError;

/// A fully-qualified collection name such as `encryption.__keyVault`.
///
/// Both parts are limited to `[A-Za-z0-9_-]`; the collection part may also
/// contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Builds a namespace from its two parts.
    pub fn new(database: &str, collection: &str) -> Result<Self, StorageError> {
        validate_part(database, false)?;
        validate_part(collection, true)?;
        Ok(Self {
            database: database.to_string(),
            collection: collection.to_string(),
        })
    }

    /// Parses `database.collection`, splitting at the first dot.
    pub fn parse(full: &str) -> Result<Self, StorageError> {
        let (database, collection) = full.split_once('.').ok_or_else(|| {
            StorageError::InvalidNamespace(format!("{full:?} is not database.collection"))
        })?;
        Self::new(database, collection)
    }

    /// Database part.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Collection part.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

fn validate_part(part: &str, allow_dots: bool) -> Result<(), StorageError> {
    if part.is_empty() {
        return Err(StorageError::InvalidNamespace(
            "namespace parts cannot be empty".into(),
        ));
    }
    if part.len() > 120 {
        return Err(StorageError::InvalidNamespace("namespace part too long".into()));
    }
    let valid = part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || (allow_dots && c == '.'));
    if !valid {
        return Err(StorageError::InvalidNamespace(format!(
            "{part:?} must match [A-Za-z0-9_-]+"
        )));
    }
    Ok(())
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
