//! Data encryption key service.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use fieldvault_crypto::DataKeyMaterial;
use fieldvault_kms::{KmsProviderConfig, KmsProviderRegistry, OperationContext};
use fieldvault_storage::{
    KeyDocument, KeyId, KeyVaultStore, MasterKeyDescriptor, Namespace, StorageError,
};

use crate::error::KeyError;
use crate::index::KeyVaultIndexManager;

/// A data encryption key as seen by callers.
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEncryptionKey {
    /// 16-byte key identifier.
    pub id: KeyId,
    /// Alt-names (case-sensitive).
    pub alt_names: BTreeSet<String>,
    /// Provider whose master key wraps this DEK.
    pub provider_name: String,
    /// Master key location recorded at creation.
    pub master_key: MasterKeyDescriptor,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

impl From<KeyDocument> for DataEncryptionKey {
    fn from(doc: KeyDocument) -> Self {
        Self {
            id: doc.id,
            alt_names: doc.key_alt_names.into_iter().collect(),
            provider_name: doc.master_key.provider.clone(),
            master_key: doc.master_key,
            created_at: doc.creation_date,
        }
    }
}

/// Looks up and creates DEKs in a key vault.
pub struct DataEncryptionKeyService {
    store: Arc<dyn KeyVaultStore>,
    indexes: KeyVaultIndexManager,
    ensured: RwLock<HashSet<Namespace>>,
}

impl DataEncryptionKeyService {
    /// Creates a service over `store`.
    pub fn new(store: Arc<dyn KeyVaultStore>) -> Self {
        Self {
            indexes: KeyVaultIndexManager::new(Arc::clone(&store)),
            store,
            ensured: RwLock::new(HashSet::new()),
        }
    }

    /// The index manager used by [`Self::find_or_create`].
    pub fn index_manager(&self) -> &KeyVaultIndexManager {
        &self.indexes
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Looks up a key by alt-name. Absent keys yield `None`.
    pub async fn find_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
        ctx: &OperationContext,
    ) -> Result<Option<DataEncryptionKey>, KeyError> {
        let doc = ctx.run(self.store.find_by_alt_name(ns, alt_name)).await??;
        Ok(doc.map(DataEncryptionKey::from))
    }

    /// Looks up a key by id. Absent keys yield `None`.
    pub async fn find_by_id(
        &self,
        ns: &Namespace,
        id: &KeyId,
        ctx: &OperationContext,
    ) -> Result<Option<DataEncryptionKey>, KeyError> {
        let doc = ctx.run(self.store.find_by_id(ns, id)).await??;
        Ok(doc.map(DataEncryptionKey::from))
    }

    /// Creates a new DEK holding `alt_name`.
    ///
    /// The unique index must already exist in `ns` (see
    /// [`KeyVaultIndexManager::ensure_index`]); this is not re-checked. Without
    /// it the store cannot reject a second key with the same alt-name.
    ///
    /// # Errors
    ///
    /// Returns `UniquenessConflict` if the alt-name is taken.
    pub async fn create_key(
        &self,
        ns: &Namespace,
        provider_name: &str,
        provider_config: &KmsProviderConfig,
        alt_name: &str,
        ctx: &OperationContext,
    ) -> Result<DataEncryptionKey, KeyError> {
        if alt_name.is_empty() {
            return Err(KeyError::Configuration("alt-name cannot be empty".into()));
        }

        let wrapper = provider_config.wrapper(provider_name)?;

        let id = KeyId::generate();
        let material = DataKeyMaterial::generate();

        let key_material = ctx
            .run(wrapper.wrap(&id, material.as_bytes()))
            .await?
            .map_err(|e| match KeyError::from(e) {
                KeyError::Kms(e) => KeyError::KeyCreation(e.to_string()),
                other => other,
            })?;

        let now = Self::now();
        let doc = KeyDocument {
            id,
            key_alt_names: vec![alt_name.to_string()],
            key_material,
            master_key: wrapper.descriptor(),
            creation_date: now,
            update_date: now,
            status: 0,
        };

        match ctx.run(self.store.insert(ns, &doc)).await? {
            Ok(()) => {}
            Err(StorageError::DuplicateKey { .. }) => {
                return Err(KeyError::UniquenessConflict {
                    alt_name: alt_name.to_string(),
                });
            }
            Err(StorageError::ConnectionFailed(msg)) => return Err(KeyError::Transport(msg)),
            Err(e) => return Err(KeyError::KeyCreation(e.to_string())),
        }

        info!(
            namespace = %ns,
            alt_name = alt_name,
            key_id = %doc.id,
            provider = provider_name,
            "Data encryption key created"
        );

        Ok(doc.into())
    }

    /// Returns the key holding `alt_name`, creating it if absent.
    ///
    /// Ensures the index once per namespace. Safe to call concurrently from
    /// many processes: all callers converge on the single surviving key.
    pub async fn find_or_create(
        &self,
        ns: &Namespace,
        provider_name: &str,
        provider_config: &KmsProviderConfig,
        alt_name: &str,
        ctx: &OperationContext,
    ) -> Result<DataEncryptionKey, KeyError> {
        self.ensure_index_once(ns, ctx).await?;

        if let Some(key) = self.find_by_alt_name(ns, alt_name, ctx).await? {
            debug!(namespace = %ns, alt_name = alt_name, key_id = %key.id, "Existing key found");
            return Ok(key);
        }

        match self
            .create_key(ns, provider_name, provider_config, alt_name, ctx)
            .await
        {
            Ok(key) => Ok(key),
            Err(KeyError::UniquenessConflict { .. }) => {
                debug!(namespace = %ns, alt_name = alt_name, "Lost creation race, re-reading");
                self.find_by_alt_name(ns, alt_name, ctx)
                    .await?
                    .ok_or_else(|| KeyError::FatalInconsistency {
                        alt_name: alt_name.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Decrypts the stored material of `key` through its provider.
    ///
    /// Returns `None` if the key is no longer in the vault.
    pub async fn unwrap_key_material(
        &self,
        ns: &Namespace,
        key: &DataEncryptionKey,
        registry: &KmsProviderRegistry,
        ctx: &OperationContext,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, KeyError> {
        let Some(doc) = ctx.run(self.store.find_by_id(ns, &key.id)).await?? else {
            return Ok(None);
        };

        let wrapper = registry.wrapper_for(&doc.master_key.provider)?;
        let material = ctx.run(wrapper.unwrap(&doc.id, &doc.key_material)).await??;
        Ok(Some(material))
    }

    async fn ensure_index_once(
        &self,
        ns: &Namespace,
        ctx: &OperationContext,
    ) -> Result<(), KeyError> {
        if self.ensured.read().await.contains(ns) {
            return Ok(());
        }

        self.indexes.ensure_index(ns, ctx).await?;
        self.ensured.write().await.insert(ns.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use fieldvault_kms::Interrupted;
    use fieldvault_storage::{IndexDefinition, MemoryKeyVault};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn ns() -> Namespace {
        Namespace::parse("encryption.__keyVault").unwrap()
    }

    fn local() -> KmsProviderConfig {
        KmsProviderConfig::local(&[0x4Du8; 96]).unwrap()
    }

    fn registry() -> KmsProviderRegistry {
        let mut registry = KmsProviderRegistry::new();
        registry.register("local", local()).unwrap();
        registry
    }

    async fn indexed_service() -> (Arc<MemoryKeyVault>, DataEncryptionKeyService) {
        let store = Arc::new(MemoryKeyVault::new());
        let service = DataEncryptionKeyService::new(store.clone());
        service
            .index_manager()
            .ensure_index(&ns(), &OperationContext::new())
            .await
            .unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn test_lifecycle_scenario() {
        let (_store, service) = indexed_service().await;
        let ctx = OperationContext::new();

        assert!(service
            .find_by_alt_name(&ns(), "demo-key", &ctx)
            .await
            .unwrap()
            .is_none());

        let created = service
            .create_key(&ns(), "local", &local(), "demo-key", &ctx)
            .await
            .unwrap();
        assert_eq!(created.id.as_bytes().len(), 16);
        assert!(created.alt_names.contains("demo-key"));
        assert_eq!(created.provider_name, "local");

        let found = service
            .find_by_alt_name(&ns(), "demo-key", &ctx)
            .await
            .unwrap();
        assert_eq!(found.as_ref(), Some(&created));

        let second = service
            .create_key(&ns(), "local", &local(), "demo-key", &ctx)
            .await;
        assert!(matches!(
            second,
            Err(KeyError::UniquenessConflict { ref alt_name }) if alt_name == "demo-key"
        ));

        let again = service
            .find_or_create(&ns(), "local", &local(), "demo-key", &ctx)
            .await
            .unwrap();
        assert_eq!(again, created);
    }

    #[tokio::test]
    async fn test_find_or_create_ensures_index() {
        let store = Arc::new(MemoryKeyVault::new());
        let service = DataEncryptionKeyService::new(store.clone());

        service
            .find_or_create(&ns(), "local", &local(), "alt-1", &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(
            store.list_indexes(&ns()).await.unwrap(),
            vec![IndexDefinition::key_alt_names()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_find_or_create_converges() {
        let store = Arc::new(MemoryKeyVault::new());
        let mut handles = Vec::new();

        // Separate service instances model independent processes.
        for _ in 0..16 {
            let service = DataEncryptionKeyService::new(store.clone());
            handles.push(tokio::spawn(async move {
                service
                    .find_or_create(&ns(), "local", &local(), "alt-1", &OperationContext::new())
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().id);
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_by_alt_name(&ns(), "alt-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_alt_name_rejected() {
        let (_store, service) = indexed_service().await;
        let result = service
            .create_key(&ns(), "local", &local(), "", &OperationContext::new())
            .await;
        assert!(matches!(result, Err(KeyError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalid_provider_is_configuration_error() {
        let (_store, service) = indexed_service().await;
        let result = service
            .create_key(&ns(), "", &local(), "alt", &OperationContext::new())
            .await;
        assert!(matches!(result, Err(KeyError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unwrap_key_material() {
        let (_store, service) = indexed_service().await;
        let ctx = OperationContext::new();
        let key = service
            .create_key(&ns(), "local", &local(), "alt", &ctx)
            .await
            .unwrap();

        let material = service
            .unwrap_key_material(&ns(), &key, &registry(), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(material.len(), 96);

        let by_id = service.find_by_id(&ns(), &key.id, &ctx).await.unwrap();
        assert_eq!(by_id, Some(key));
    }

    #[tokio::test]
    async fn test_unwrap_with_unknown_provider() {
        let (_store, service) = indexed_service().await;
        let ctx = OperationContext::new();
        let key = service
            .create_key(&ns(), "local", &local(), "alt", &ctx)
            .await
            .unwrap();

        let result = service
            .unwrap_key_material(&ns(), &key, &KmsProviderRegistry::new(), &ctx)
            .await;
        assert!(matches!(result, Err(KeyError::Configuration(_))));
    }

    /// Store whose alt-name lookups can be made stale or slow.
    struct FlakyStore {
        inner: MemoryKeyVault,
        stale_reads: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FlakyStore {
        fn new(stale_reads: usize, delay: Option<Duration>) -> Self {
            Self {
                inner: MemoryKeyVault::new(),
                stale_reads: AtomicUsize::new(stale_reads),
                delay,
            }
        }
    }

    #[async_trait]
    impl KeyVaultStore for FlakyStore {
        async fn list_indexes(
            &self,
            ns: &Namespace,
        ) -> Result<Vec<IndexDefinition>, StorageError> {
            self.inner.list_indexes(ns).await
        }

        async fn create_index(
            &self,
            ns: &Namespace,
            index: &IndexDefinition,
        ) -> Result<(), StorageError> {
            self.inner.create_index(ns, index).await
        }

        async fn find_by_alt_name(
            &self,
            ns: &Namespace,
            alt_name: &str,
        ) -> Result<Option<KeyDocument>, StorageError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let stale = self
                .stale_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stale {
                return Ok(None);
            }
            self.inner.find_by_alt_name(ns, alt_name).await
        }

        async fn find_by_id(
            &self,
            ns: &Namespace,
            id: &KeyId,
        ) -> Result<Option<KeyDocument>, StorageError> {
            self.inner.find_by_id(ns, id).await
        }

        async fn insert(&self, ns: &Namespace, doc: &KeyDocument) -> Result<(), StorageError> {
            self.inner.insert(ns, doc).await
        }
    }

    #[tokio::test]
    async fn test_conflict_falls_back_to_single_reread() {
        let store = Arc::new(FlakyStore::new(0, None));
        let service = DataEncryptionKeyService::new(store.clone());
        let ctx = OperationContext::new();
        let original = service
            .find_or_create(&ns(), "local", &local(), "alt", &ctx)
            .await
            .unwrap();

        // The next lookup misses the existing key, so creation collides.
        store.stale_reads.store(1, Ordering::SeqCst);
        let again = service
            .find_or_create(&ns(), "local", &local(), "alt", &ctx)
            .await
            .unwrap();

        assert_eq!(again.id, original.id);
        assert_eq!(store.inner.count_by_alt_name(&ns(), "alt").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reread_miss_is_fatal_inconsistency() {
        let store = Arc::new(FlakyStore::new(0, None));
        let service = DataEncryptionKeyService::new(store.clone());
        let ctx = OperationContext::new();
        service
            .find_or_create(&ns(), "local", &local(), "alt", &ctx)
            .await
            .unwrap();

        store.stale_reads.store(2, Ordering::SeqCst);
        let result = service
            .find_or_create(&ns(), "local", &local(), "alt", &ctx)
            .await;

        assert!(matches!(result, Err(KeyError::FatalInconsistency { .. })));
        assert!(!result.unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(FlakyStore::new(0, Some(Duration::from_secs(30))));
        let service = DataEncryptionKeyService::new(store);
        let ctx = OperationContext::with_timeout(Duration::from_millis(20));

        let result = service.find_by_alt_name(&ns(), "alt", &ctx).await;
        assert!(matches!(
            result,
            Err(KeyError::Timeout(Interrupted::DeadlineExceeded))
        ));
        assert!(result.unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_timeout() {
        let store = Arc::new(FlakyStore::new(0, Some(Duration::from_secs(30))));
        let service = Arc::new(DataEncryptionKeyService::new(store));
        let token = CancellationToken::new();
        let ctx = OperationContext::new().with_cancellation(token.clone());

        let task = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .find_or_create(&ns(), "local", &local(), "alt", &ctx)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(KeyError::Timeout(Interrupted::Cancelled))));
    }
}
