//! In-process key vault backend.
//!
//! Emulates the index semantics of a document store: uniqueness of
//! alt-names is enforced only once a unique index on `keyAltNames` exists.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::KeyVaultStore;
use crate::document::{IndexDefinition, KeyDocument, KeyId};
use crate::error::StorageError;
use crate::namespace::Namespace;

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<KeyDocument>,
    indexes: Vec<IndexDefinition>,
}

impl Collection {
    fn unique_alt_names(&self) -> bool {
        self.indexes.iter().any(IndexDefinition::enforces_unique_alt_names)
    }

    fn alt_name_clash(&self, doc: &KeyDocument) -> Option<String> {
        doc.key_alt_names
            .iter()
            .find(|name| self.documents.iter().any(|d| d.has_alt_name(name)))
            .cloned()
    }

    fn has_duplicate_alt_names(&self) -> bool {
        self.documents.iter().enumerate().any(|(i, a)| {
            self.documents[i + 1..]
                .iter()
                .any(|b| a.key_alt_names.iter().any(|n| b.has_alt_name(n)))
        })
    }
}

/// Key vault backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryKeyVault {
    collections: Mutex<HashMap<Namespace, Collection>>,
}

impl MemoryKeyVault {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts key documents carrying `alt_name`, whether or not a unique
    /// index is defined.
    pub fn count_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
    ) -> Result<usize, StorageError> {
        let collections = self.lock()?;
        Ok(collections
            .get(ns)
            .map(|c| c.documents.iter().filter(|d| d.has_alt_name(alt_name)).count())
            .unwrap_or(0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Namespace, Collection>>, StorageError> {
        self.collections
            .lock()
            .map_err(|_| StorageError::ConnectionFailed("memory vault poisoned".into()))
    }
}

#[async_trait]
impl KeyVaultStore for MemoryKeyVault {
    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexDefinition>, StorageError> {
        let collections = self.lock()?;
        Ok(collections
            .get(ns)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        ns: &Namespace,
        index: &IndexDefinition,
    ) -> Result<(), StorageError> {
        let mut collections = self.lock()?;
        let collection = collections.entry(ns.clone()).or_default();

        if let Some(existing) = collection.indexes.iter().find(|i| i.name == index.name) {
            if existing == index {
                return Ok(());
            }
            return Err(StorageError::IndexOptionsConflict {
                name: index.name.clone(),
                reason: "an index with the same name has different options".into(),
            });
        }

        if index.enforces_unique_alt_names() && collection.has_duplicate_alt_names() {
            return Err(StorageError::DuplicateKey {
                namespace: ns.to_string(),
                key: "existing documents share an alt-name".into(),
            });
        }

        debug!(namespace = %ns, index = %index.name, "Index created");
        collection.indexes.push(index.clone());
        Ok(())
    }

    async fn find_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
    ) -> Result<Option<KeyDocument>, StorageError> {
        let collections = self.lock()?;
        Ok(collections
            .get(ns)
            .and_then(|c| c.documents.iter().find(|d| d.has_alt_name(alt_name)))
            .cloned())
    }

    async fn find_by_id(
        &self,
        ns: &Namespace,
        id: &KeyId,
    ) -> Result<Option<KeyDocument>, StorageError> {
        let collections = self.lock()?;
        Ok(collections
            .get(ns)
            .and_then(|c| c.documents.iter().find(|d| d.id == *id))
            .cloned())
    }

    async fn insert(&self, ns: &Namespace, doc: &KeyDocument) -> Result<(), StorageError> {
        let mut collections = self.lock()?;
        let collection = collections.entry(ns.clone()).or_default();

        if collection.documents.iter().any(|d| d.id == doc.id) {
            return Err(StorageError::DuplicateKey {
                namespace: ns.to_string(),
                key: format!("_id {}", doc.id),
            });
        }

        if collection.unique_alt_names() {
            if let Some(name) = collection.alt_name_clash(doc) {
                return Err(StorageError::DuplicateKey {
                    namespace: ns.to_string(),
                    key: name,
                });
            }
        }

        collection.documents.push(doc.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::document::{MasterKeyDescriptor, MasterKeyLocation};

    fn ns() -> Namespace {
        Namespace::parse("encryption.__keyVault").unwrap()
    }

    fn doc(alt_name: &str) -> KeyDocument {
        KeyDocument {
            id: KeyId::generate(),
            key_alt_names: vec![alt_name.to_string()],
            key_material: vec![0u8; 8],
            master_key: MasterKeyDescriptor {
                provider: "local".into(),
                location: MasterKeyLocation::Local,
            },
            creation_date: 0,
            update_date: 0,
            status: 0,
        }
    }

    #[tokio::test]
    async fn test_duplicates_allowed_without_index() {
        let vault = MemoryKeyVault::new();

        vault.insert(&ns(), &doc("alt")).await.unwrap();
        vault.insert(&ns(), &doc("alt")).await.unwrap();

        assert_eq!(vault.count_by_alt_name(&ns(), "alt").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicate() {
        let vault = MemoryKeyVault::new();
        vault
            .create_index(&ns(), &IndexDefinition::key_alt_names())
            .await
            .unwrap();

        vault.insert(&ns(), &doc("alt")).await.unwrap();
        let result = vault.insert(&ns(), &doc("alt")).await;

        assert!(matches!(result, Err(StorageError::DuplicateKey { key, .. }) if key == "alt"));
        assert_eq!(vault.count_by_alt_name(&ns(), "alt").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_alt_names_case_sensitive() {
        let vault = MemoryKeyVault::new();
        vault
            .create_index(&ns(), &IndexDefinition::key_alt_names())
            .await
            .unwrap();

        vault.insert(&ns(), &doc("Alt")).await.unwrap();
        vault.insert(&ns(), &doc("alt")).await.unwrap();

        assert!(vault.find_by_alt_name(&ns(), "ALT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_identical_index_is_noop() {
        let vault = MemoryKeyVault::new();
        let index = IndexDefinition::key_alt_names();

        vault.create_index(&ns(), &index).await.unwrap();
        vault.create_index(&ns(), &index).await.unwrap();

        assert_eq!(vault.list_indexes(&ns()).await.unwrap(), vec![index]);
    }

    #[tokio::test]
    async fn test_create_conflicting_index_fails() {
        let vault = MemoryKeyVault::new();
        let mut non_unique = IndexDefinition::key_alt_names();
        non_unique.unique = false;
        vault.create_index(&ns(), &non_unique).await.unwrap();

        let result = vault
            .create_index(&ns(), &IndexDefinition::key_alt_names())
            .await;
        assert!(matches!(result, Err(StorageError::IndexOptionsConflict { .. })));
    }

    #[tokio::test]
    async fn test_unique_index_over_duplicates_fails() {
        let vault = MemoryKeyVault::new();
        vault.insert(&ns(), &doc("alt")).await.unwrap();
        vault.insert(&ns(), &doc("alt")).await.unwrap();

        let result = vault
            .create_index(&ns(), &IndexDefinition::key_alt_names())
            .await;
        assert!(matches!(result, Err(StorageError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_namespaces_isolated() {
        let vault = MemoryKeyVault::new();
        let other = Namespace::parse("other.__keyVault").unwrap();

        vault.insert(&ns(), &doc("alt")).await.unwrap();

        assert!(vault.find_by_alt_name(&other, "alt").await.unwrap().is_none());
        assert!(vault.list_indexes(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let vault = MemoryKeyVault::new();
        let d = doc("alt");
        vault.insert(&ns(), &d).await.unwrap();

        assert_eq!(vault.find_by_id(&ns(), &d.id).await.unwrap(), Some(d));
        assert!(vault
            .find_by_id(&ns(), &KeyId::generate())
            .await
            .unwrap()
            .is_none());
    }
}
