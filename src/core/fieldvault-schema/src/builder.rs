//! Schema compilation.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use fieldvault_storage::{Namespace, KEY_ID_SIZE};

use crate::error::SchemaError;
use crate::rule::{FieldEncryptionRule, FieldRule};

/// BSON binary subtype of a UUID, as written in `$binary.subType`.
const UUID_SUBTYPE: &str = "04";

/// Compiled schema map: namespace to root object node.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CollectionSchema {
    schemas: Map<String, Value>,
}

impl CollectionSchema {
    /// Root node for `ns`.
    pub fn schema_for(&self, ns: &Namespace) -> Option<&Value> {
        self.schemas.get(&ns.to_string())
    }

    /// Namespaces covered by this schema, in insertion order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Decodes the key id bound to `ns`.
    pub fn key_id_for(&self, ns: &Namespace) -> Option<Vec<u8>> {
        let encoded = self
            .schema_for(ns)?
            .pointer("/encryptMetadata/keyId/0/$binary/base64")?
            .as_str()?;
        BASE64.decode(encoded).ok()
    }

    /// The schema map as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.schemas.clone())
    }

    /// Compact JSON, stable for identical inputs.
    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }

    /// Indented JSON for display.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.schemas).unwrap_or_else(|_| self.to_json_string())
    }
}

/// Builds the encryption schema of one collection.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    namespace: Namespace,
}

impl SchemaBuilder {
    /// Creates a builder for the collection `namespace`.
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    /// Compiles `rules` under `key_id`.
    ///
    /// Pure: the same key id and rules always yield an identical schema.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the key id is empty or not 16 bytes, a field
    /// name is empty, duplicated, dotted or starts with `$`, a nested object
    /// has no rules, or a type that cannot be encrypted deterministically is
    /// given the deterministic algorithm.
    pub fn build(
        &self,
        key_id: &[u8],
        rules: &[FieldRule],
    ) -> Result<CollectionSchema, SchemaError> {
        if key_id.is_empty() {
            return Err(SchemaError::Validation("key id cannot be empty".into()));
        }
        if key_id.len() != KEY_ID_SIZE {
            return Err(SchemaError::Validation(format!(
                "key id must be {KEY_ID_SIZE} bytes, got {}",
                key_id.len()
            )));
        }

        let properties = compile_properties(rules, "")?;

        let root = json!({
            "bsonType": "object",
            "encryptMetadata": {
                "keyId": [{
                    "$binary": {
                        "base64": BASE64.encode(key_id),
                        "subType": UUID_SUBTYPE,
                    }
                }]
            },
            "properties": properties,
        });

        debug!(namespace = %self.namespace, rules = rules.len(), "Schema built");

        let mut schemas = Map::new();
        schemas.insert(self.namespace.to_string(), root);
        Ok(CollectionSchema { schemas })
    }
}

fn compile_properties(rules: &[FieldRule], parent: &str) -> Result<Value, SchemaError> {
    if rules.is_empty() {
        let location = if parent.is_empty() { "schema" } else { parent };
        return Err(SchemaError::Validation(format!(
            "{location} must contain at least one rule"
        )));
    }

    let mut seen = HashSet::new();
    let mut properties = Map::new();

    for rule in rules {
        let field = rule.field();
        let path = qualified(parent, field);
        validate_field_name(field, &path)?;

        if !seen.insert(field) {
            return Err(SchemaError::Validation(format!("duplicate field: {path}")));
        }

        let node = match rule {
            FieldRule::Encrypt(rule) => encrypt_node(rule, &path)?,
            FieldRule::Object { properties, .. } => json!({
                "bsonType": "object",
                "properties": compile_properties(properties, &path)?,
            }),
        };

        properties.insert(field.to_string(), node);
    }

    Ok(Value::Object(properties))
}

fn encrypt_node(rule: &FieldEncryptionRule, path: &str) -> Result<Value, SchemaError> {
    if rule.algorithm == crate::Algorithm::Deterministic && !rule.bson_type.allows_deterministic() {
        return Err(SchemaError::Validation(format!(
            "{path}: {} fields cannot use deterministic encryption",
            rule.bson_type
        )));
    }

    Ok(json!({
        "encrypt": {
            "bsonType": rule.bson_type.as_str(),
            "algorithm": rule.algorithm.token(),
        }
    }))
}

fn validate_field_name(field: &str, path: &str) -> Result<(), SchemaError> {
    if field.is_empty() {
        return Err(SchemaError::Validation(format!(
            "empty field name under {}",
            if path.is_empty() { "root" } else { path }
        )));
    }
    if field.contains('.') {
        return Err(SchemaError::Validation(format!(
            "{path}: field names cannot contain dots; nest with an object rule"
        )));
    }
    if field.starts_with('$') {
        return Err(SchemaError::Validation(format!(
            "{path}: field names cannot start with $"
        )));
    }
    Ok(())
}

fn qualified(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}
