//! Key vault index management.

use std::sync::Arc;

use tracing::{debug, info, warn};

use fieldvault_kms::OperationContext;
use fieldvault_storage::{
    IndexDefinition, KeyVaultStore, Namespace, StorageError, KEY_ALT_NAMES_FIELD,
};

use crate::error::KeyError;

/// Result of [`KeyVaultIndexManager::ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The index was created by this call.
    Created,
    /// An identical index already existed.
    AlreadyPresent,
}

/// Ensures the unique partial index on `keyAltNames` exists.
///
/// Must succeed before the first DEK is created in a vault. An existing
/// index with a different definition is reported, never dropped or redefined.
#[derive(Clone)]
pub struct KeyVaultIndexManager {
    store: Arc<dyn KeyVaultStore>,
}

impl KeyVaultIndexManager {
    /// Creates a manager over `store`.
    pub fn new(store: Arc<dyn KeyVaultStore>) -> Self {
        Self { store }
    }

    /// Creates the index if absent. Idempotent.
    pub async fn ensure_index(
        &self,
        ns: &Namespace,
        ctx: &OperationContext,
    ) -> Result<IndexOutcome, KeyError> {
        ctx.run(self.ensure(ns)).await?
    }

    async fn ensure(&self, ns: &Namespace) -> Result<IndexOutcome, KeyError> {
        let wanted = IndexDefinition::key_alt_names();

        let existing = self.list(ns).await?;
        if let Some(outcome) = compare(ns, &existing, &wanted)? {
            debug!(namespace = %ns, index = %wanted.name, "Index already present");
            return Ok(outcome);
        }

        match self.store.create_index(ns, &wanted).await {
            Ok(()) => {
                info!(namespace = %ns, index = %wanted.name, "Key vault index created");
                Ok(IndexOutcome::Created)
            }
            Err(StorageError::IndexOptionsConflict { name, reason }) => {
                // Lost a race with another creator; judge whatever won.
                debug!(namespace = %ns, index = %name, reason = %reason, "Index create raced");
                let existing = self.list(ns).await?;
                compare(ns, &existing, &wanted)?.ok_or_else(|| {
                    KeyError::IndexCreation(format!(
                        "store reported a conflict on {name} but lists no such index"
                    ))
                })
            }
            Err(StorageError::ConnectionFailed(msg)) => Err(KeyError::Transport(msg)),
            Err(e) => Err(KeyError::IndexCreation(e.to_string())),
        }
    }

    async fn list(&self, ns: &Namespace) -> Result<Vec<IndexDefinition>, KeyError> {
        self.store.list_indexes(ns).await.map_err(|e| match e {
            StorageError::ConnectionFailed(msg) => KeyError::Transport(msg),
            other => KeyError::IndexCreation(other.to_string()),
        })
    }
}

/// `Some(AlreadyPresent)` if `wanted` exists, an error if an incompatible
/// index on the same name or field exists, `None` otherwise.
fn compare(
    ns: &Namespace,
    existing: &[IndexDefinition],
    wanted: &IndexDefinition,
) -> Result<Option<IndexOutcome>, KeyError> {
    if existing.iter().any(|i| i == wanted) {
        return Ok(Some(IndexOutcome::AlreadyPresent));
    }

    if let Some(conflict) = existing
        .iter()
        .find(|i| i.name == wanted.name || i.field == KEY_ALT_NAMES_FIELD)
    {
        warn!(namespace = %ns, index = %conflict.name, "Conflicting key vault index");
        return Err(KeyError::IndexConflict {
            namespace: ns.to_string(),
            existing: format!(
                "{} on {} (unique: {}, partial filter: {:?})",
                conflict.name, conflict.field, conflict.unique, conflict.partial_filter
            ),
        });
    }

    Ok(None)
}
