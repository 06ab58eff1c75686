//! # Fieldvault Storage
//!
//! Storage abstraction for the key vault collection.
//!
//! Provides the [`KeyVaultStore`] trait, the key document model and an
//! in-process backend. Uniqueness of key alt-names is a property of the
//! store (its unique partial index), never of the caller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod document;
pub mod error;
pub mod memory;
pub mod namespace;

pub use backend::KeyVaultStore;
pub use document::{
    IndexDefinition, KeyDocument, KeyId, MasterKeyDescriptor, MasterKeyLocation, PartialFilter,
    KEY_ALT_NAMES_FIELD, KEY_ID_SIZE,
};
pub use error::StorageError;
pub use memory::MemoryKeyVault;
pub use namespace::Namespace;
