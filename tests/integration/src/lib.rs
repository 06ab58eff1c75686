//! Integration tests for Fieldvault.
//!
//! These tests run the whole key lifecycle against an on-disk SQLite key
//! vault, from index creation to an encrypting client session.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use fieldvault_client::{AutoEncryptionOptions, ClientError, DocumentDriver, DriverSession};
use fieldvault_crypto::{load_local_master_key, write_local_master_key, LocalMasterKey};
use fieldvault_keys::DataEncryptionKeyService;
use fieldvault_kms::{KmsProviderConfig, KmsProviderRegistry};
use fieldvault_storage::Namespace;
use fieldvault_storage_sqlite::SqliteKeyVault;

/// Provider name used throughout the tests.
pub const PROVIDER: &str = "local";

/// Key vault database name.
pub const VAULT_DB: &str = "keyvault";

// ============================================================================
// Test Vault
// ============================================================================

/// A key vault directory with its own local master key file.
pub struct TestVault {
    dir: TempDir,
    pub namespace: Namespace,
}

impl TestVault {
    /// Creates a vault directory and writes a fresh master key into it.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp dir")?;
        let vault = Self {
            dir,
            namespace: Namespace::parse("encryption.__keyVault")?,
        };
        write_local_master_key(vault.master_key_path(), &LocalMasterKey::generate())?;
        Ok(vault)
    }

    /// Path of the master key file.
    pub fn master_key_path(&self) -> PathBuf {
        self.dir.path().join("master-key.txt")
    }

    /// Loads the local provider from the master key file.
    pub fn provider(&self) -> Result<KmsProviderConfig> {
        let master_key = load_local_master_key(self.master_key_path())?;
        Ok(KmsProviderConfig::Local { master_key })
    }

    /// Registry holding the local provider.
    pub fn registry(&self) -> Result<KmsProviderRegistry> {
        let mut registry = KmsProviderRegistry::new();
        registry.register(PROVIDER, self.provider()?)?;
        Ok(registry)
    }

    /// Opens a new handle on the vault database, as a separate process would.
    pub async fn open_store(&self) -> Result<Arc<SqliteKeyVault>> {
        let store = SqliteKeyVault::open(self.dir.path().join("data"), VAULT_DB).await?;
        Ok(Arc::new(store))
    }

    /// Service over a new store handle.
    pub async fn service(&self) -> Result<DataEncryptionKeyService> {
        Ok(DataEncryptionKeyService::new(self.open_store().await?))
    }
}

// ============================================================================
// Recording Driver
// ============================================================================

type Collections = Arc<Mutex<HashMap<String, Vec<Value>>>>;

/// Driver that keeps documents in memory and records the options it was
/// connected with.
#[derive(Default)]
pub struct RecordingDriver {
    pub connections: Mutex<Vec<AutoEncryptionOptions>>,
    collections: Collections,
}

#[async_trait]
impl DocumentDriver for RecordingDriver {
    async fn connect(
        &self,
        _target: &str,
        options: AutoEncryptionOptions,
    ) -> Result<Box<dyn DriverSession>, ClientError> {
        self.connections.lock().unwrap().push(options);
        Ok(Box::new(RecordingSession {
            collections: self.collections.clone(),
        }))
    }
}

struct RecordingSession {
    collections: Collections,
}

#[async_trait]
impl DriverSession for RecordingSession {
    async fn insert_one(&self, ns: &Namespace, document: Value) -> Result<(), ClientError> {
        self.collections
            .lock()
            .unwrap()
            .entry(ns.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn find_one(&self, ns: &Namespace, filter: Value) -> Result<Option<Value>, ClientError> {
        let collections = self.collections.lock().unwrap();
        let filter = filter
            .as_object()
            .ok_or_else(|| ClientError::Driver("filter must be an object".into()))?;
        Ok(collections.get(&ns.to_string()).and_then(|docs| {
            docs.iter()
                .find(|doc| filter.iter().all(|(k, v)| doc.get(k) == Some(v)))
                .cloned()
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use fieldvault_client::{EncryptingClientFactory, HelperOptions, ProcessHelper};
    use fieldvault_crypto::keys::DATA_KEY_SIZE;
    use fieldvault_keys::{IndexOutcome, KeyError};
    use fieldvault_kms::OperationContext;
    use fieldvault_schema::{BsonType, FieldRule, SchemaBuilder};
    use serde_json::json;

    const ALT_NAME: &str = "demo-data-key";

    fn patients() -> Namespace {
        Namespace::parse("medicalRecords.patients").unwrap()
    }

    fn patient_rules() -> Vec<FieldRule> {
        vec![
            FieldRule::object(
                "insurance",
                vec![FieldRule::deterministic("policyNumber", BsonType::Int)],
            ),
            FieldRule::random("medicalRecords", BsonType::Array),
            FieldRule::random("bloodType", BsonType::String),
            FieldRule::deterministic("ssn", BsonType::Int),
        ]
    }

    #[tokio::test]
    async fn test_key_lifecycle_scenario() {
        let vault = TestVault::new().unwrap();
        let service = vault.service().await.unwrap();
        let provider = vault.provider().unwrap();
        let ns = &vault.namespace;
        let ctx = OperationContext::new();

        let outcome = service.index_manager().ensure_index(ns, &ctx).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Created);

        assert!(service
            .find_by_alt_name(ns, ALT_NAME, &ctx)
            .await
            .unwrap()
            .is_none());

        let created = service
            .create_key(ns, PROVIDER, &provider, ALT_NAME, &ctx)
            .await
            .unwrap();
        assert_eq!(created.provider_name, PROVIDER);
        assert!(created.alt_names.contains(ALT_NAME));

        let found = service
            .find_by_alt_name(ns, ALT_NAME, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);

        let second = service
            .create_key(ns, PROVIDER, &provider, ALT_NAME, &ctx)
            .await;
        assert!(matches!(second, Err(KeyError::UniquenessConflict { .. })));

        let converged = service
            .find_or_create(ns, PROVIDER, &provider, ALT_NAME, &ctx)
            .await
            .unwrap();
        assert_eq!(converged.id, created.id);

        let again = service.index_manager().ensure_index(ns, &ctx).await.unwrap();
        assert_eq!(again, IndexOutcome::AlreadyPresent);

        let schema = SchemaBuilder::new(patients())
            .build(created.id.as_bytes(), &patient_rules())
            .unwrap();
        assert_eq!(
            schema.key_id_for(&patients()),
            Some(created.id.as_bytes().to_vec())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_processes_converge() {
        let vault = Arc::new(TestVault::new().unwrap());
        let provider = vault.provider().unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let vault = Arc::clone(&vault);
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                let service = vault.service().await.unwrap();
                service
                    .find_or_create(
                        &vault.namespace,
                        PROVIDER,
                        &provider,
                        ALT_NAME,
                        &OperationContext::new(),
                    )
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let store = vault.open_store().await.unwrap();
        let count = store
            .count_by_alt_name(&vault.namespace, ALT_NAME)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_key_survives_reopen() {
        let vault = TestVault::new().unwrap();
        let ctx = OperationContext::new();

        let created = {
            let service = vault.service().await.unwrap();
            service
                .find_or_create(
                &vault.namespace,
                PROVIDER,
                &vault.provider().unwrap(),
                ALT_NAME,
                &ctx,
            )
                .await
                .unwrap()
        };

        let service = vault.service().await.unwrap();
        let found = service
            .find_by_id(&vault.namespace, &created.id, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.alt_names, created.alt_names);

        let material = service
            .unwrap_key_material(&vault.namespace, &found, &vault.registry().unwrap(), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(material.len(), DATA_KEY_SIZE);
    }

    #[tokio::test]
    async fn test_wrong_master_key_cannot_unwrap() {
        let vault = TestVault::new().unwrap();
        let service = vault.service().await.unwrap();
        let ctx = OperationContext::new();

        let key = service
            .find_or_create(
                &vault.namespace,
                PROVIDER,
                &vault.provider().unwrap(),
                ALT_NAME,
                &ctx,
            )
            .await
            .unwrap();

        let mut other = KmsProviderRegistry::new();
        other
            .register(
                PROVIDER,
                KmsProviderConfig::Local {
                    master_key: LocalMasterKey::generate(),
                },
            )
            .unwrap();

        let err = service
            .unwrap_key_material(&vault.namespace, &key, &other, &ctx)
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_encrypting_client_session() {
        let vault = TestVault::new().unwrap();
        let service = vault.service().await.unwrap();
        let provider = vault.provider().unwrap();
        let ctx = OperationContext::new();

        let key = service
            .find_or_create(&vault.namespace, PROVIDER, &provider, ALT_NAME, &ctx)
            .await
            .unwrap();
        let schema = SchemaBuilder::new(patients())
            .build(key.id.as_bytes(), &patient_rules())
            .unwrap();

        let driver = Arc::new(RecordingDriver::default());
        let factory = EncryptingClientFactory::new(
            vault.namespace.clone(),
            driver.clone(),
            Arc::new(ProcessHelper::default()),
        )
        .with_helper_options(HelperOptions {
            bypass_spawn: true,
            ..HelperOptions::default()
        });

        let client = factory
            .build("mongodb://localhost:27017", PROVIDER, &provider, &schema, &ctx)
            .await
            .unwrap();

        let patient = json!({
            "name": "Jon Doe",
            "ssn": 241014209,
            "bloodType": "AB+",
            "medicalRecords": [{ "weight": 180, "bloodPressure": "120/80" }],
            "insurance": { "provider": "MaestCare", "policyNumber": 123142 }
        });
        client.insert_one(&patients(), patient.clone()).await.unwrap();

        let found = client
            .find_one(&patients(), json!({ "ssn": 241014209 }))
            .await
            .unwrap();
        assert_eq!(found, Some(patient));

        let connections = driver.connections.lock().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].key_vault_namespace, vault.namespace);
        assert_eq!(
            connections[0].schema.key_id_for(&patients()),
            Some(key.id.as_bytes().to_vec())
        );
    }
}
