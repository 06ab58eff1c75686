//! # Fieldvault Schema
//!
//! Compiles field encryption rules into the per-collection schema an
//! encrypting client consumes.
//!
//! ## Schema Format
//!
//! ```json
//! {
//!   "medicalRecords.patients": {
//!     "bsonType": "object",
//!     "encryptMetadata": { "keyId": [{ "$binary": { "base64": "...", "subType": "04" } }] },
//!     "properties": {
//!       "ssn": {
//!         "encrypt": {
//!           "bsonType": "int",
//!           "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Rule order is preserved in the output.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod error;
pub mod rule;

pub use builder::{CollectionSchema, SchemaBuilder};
pub use error::SchemaError;
pub use rule::{Algorithm, BsonType, FieldEncryptionRule, FieldRule};
