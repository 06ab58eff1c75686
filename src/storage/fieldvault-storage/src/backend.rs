//! Key vault store trait definition.

use async_trait::async_trait;

use crate::document::{IndexDefinition, KeyDocument, KeyId};
use crate::error::StorageError;
use crate::namespace::Namespace;

/// A backing store for key vault collections.
///
/// Implementations must enforce every unique index they report through
/// [`list_indexes`](KeyVaultStore::list_indexes) at write time, across all
/// writers sharing the store.
#[async_trait]
pub trait KeyVaultStore: Send + Sync {
    /// Lists the secondary indexes defined on a vault collection.
    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexDefinition>, StorageError>;

    /// Creates an index.
    ///
    /// Creating an index identical to an existing one is a no-op. An existing
    /// index with the same name but other options fails with
    /// `IndexOptionsConflict`.
    async fn create_index(&self, ns: &Namespace, index: &IndexDefinition)
        -> Result<(), StorageError>;

    /// Finds the key document carrying `alt_name` among its alt-names.
    async fn find_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
    ) -> Result<Option<KeyDocument>, StorageError>;

    /// Finds a key document by identifier.
    async fn find_by_id(&self, ns: &Namespace, id: &KeyId)
        -> Result<Option<KeyDocument>, StorageError>;

    /// Inserts a key document.
    ///
    /// Fails with `DuplicateKey` when a unique index rejects it.
    async fn insert(&self, ns: &Namespace, doc: &KeyDocument) -> Result<(), StorageError>;
}
