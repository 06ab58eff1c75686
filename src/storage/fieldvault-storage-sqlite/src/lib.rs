//! # Fieldvault Storage - SQLite Backend
//!
//! SQLite implementation of the key vault store.
//!
//! Key documents live in `key_documents`, one row per document. Each alt-name
//! is a row in `key_alt_names`, so the unique partial index on `keyAltNames`
//! becomes a real SQLite `CREATE UNIQUE INDEX ... WHERE namespace = ...`.
//! Every process opening the same database file shares that constraint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
};
use sqlx::Transaction;
use tracing::{debug, info};

use fieldvault_storage::{
    IndexDefinition, KeyDocument, KeyId, KeyVaultStore, Namespace, StorageError,
    KEY_ALT_NAMES_FIELD,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS key_documents (
        namespace  TEXT NOT NULL,
        id         BLOB NOT NULL,
        document   TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (namespace, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS key_alt_names (
        namespace TEXT NOT NULL,
        alt_name  TEXT NOT NULL,
        key_id    BLOB NOT NULL,
        FOREIGN KEY (namespace, key_id) REFERENCES key_documents (namespace, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alt_names_lookup ON key_alt_names (namespace, alt_name)",
    r#"
    CREATE TABLE IF NOT EXISTS vault_indexes (
        namespace  TEXT NOT NULL,
        name       TEXT NOT NULL,
        definition TEXT NOT NULL,
        PRIMARY KEY (namespace, name)
    )
    "#,
];

/// SQLite key vault backend.
///
/// The database lives at `{base_path}/{name}.db`.
#[derive(Clone)]
pub struct SqliteKeyVault {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteKeyVault {
    /// Opens or creates a key vault database.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where the database is stored
    /// * `name` - Database name (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        Self::validate_name(name)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{name}.db"));

        debug!(path = %db_path.display(), "Opening SQLite key vault");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let vault = Self { pool, db_path };

        vault.migrate().await?;

        info!(path = %vault.db_path.display(), "SQLite key vault ready");

        Ok(vault)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Counts key documents carrying `alt_name`, whether or not a unique
    /// index is defined.
    pub async fn count_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
    ) -> Result<usize, StorageError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT key_id) FROM key_alt_names \
             WHERE namespace = ? AND alt_name = ?",
        )
        .bind(ns.to_string())
        .bind(alt_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }

    /// Validates that a database name is safe to use as a file name.
    fn validate_name(name: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidInput("name cannot be empty".into()));
        }

        if name.len() > 64 {
            return Err(StorageError::InvalidInput("name too long".into()));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "name must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Runs database migrations.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running key vault migrations");

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;
        }

        Ok(())
    }

    /// Returns the current Unix timestamp.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// SQL name of the physical index backing a vault index.
    fn physical_index_name(ns: &Namespace, index: &IndexDefinition) -> String {
        format!(
            "vault_ix_{}_{}",
            hex_encode(ns.to_string().as_bytes()),
            hex_encode(index.name.as_bytes())
        )
    }

    /// DDL for the physical index. Namespaces are restricted to
    /// `[A-Za-z0-9_.-]`, so embedding them as a literal is safe.
    fn physical_index_ddl(ns: &Namespace, index: &IndexDefinition) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let literal = ns.to_string().replace('\'', "''");
        format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON key_alt_names (alt_name) \
             WHERE namespace = '{literal}'",
            Self::physical_index_name(ns, index)
        )
    }

    async fn create_index_in(
        conn: &mut SqliteConnection,
        ns: &Namespace,
        index: &IndexDefinition,
    ) -> Result<(), StorageError> {
        let namespace = ns.to_string();

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT definition FROM vault_indexes WHERE namespace = ? AND name = ?",
        )
        .bind(&namespace)
        .bind(&index.name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if let Some((definition,)) = existing {
            let existing: IndexDefinition = serde_json::from_str(&definition)?;
            if existing == *index {
                return Ok(());
            }
            return Err(StorageError::IndexOptionsConflict {
                name: index.name.clone(),
                reason: format!("existing definition {definition}"),
            });
        }

        sqlx::query(&Self::physical_index_ddl(ns, index))
            .execute(&mut *conn)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StorageError::DuplicateKey {
                        namespace: namespace.clone(),
                        key: "existing documents share an alt-name".into(),
                    }
                }
                _ => StorageError::QueryFailed(e.to_string()),
            })?;

        sqlx::query("INSERT INTO vault_indexes (namespace, name, definition) VALUES (?, ?, ?)")
            .bind(&namespace)
            .bind(&index.name)
            .bind(serde_json::to_string(index)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn insert_in(
        conn: &mut SqliteConnection,
        ns: &Namespace,
        doc: &KeyDocument,
    ) -> Result<(), StorageError> {
        let namespace = ns.to_string();
        let id = doc.id.as_bytes().to_vec();

        sqlx::query(
            "INSERT INTO key_documents (namespace, id, document, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&namespace)
        .bind(&id)
        .bind(serde_json::to_string(doc)?)
        .bind(Self::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| unique_violation_or(e, &namespace, format!("_id {}", doc.id)))?;

        for alt_name in &doc.key_alt_names {
            sqlx::query("INSERT INTO key_alt_names (namespace, alt_name, key_id) VALUES (?, ?, ?)")
                .bind(&namespace)
                .bind(alt_name)
                .bind(&id)
                .execute(&mut *conn)
                .await
                .map_err(|e| unique_violation_or(e, &namespace, alt_name.clone()))?;
        }

        Ok(())
    }

    /// Opens a `BEGIN IMMEDIATE` transaction, so concurrent writers
    /// serialize on the database lock instead of failing on a stale read
    /// snapshot. Dropping the guard before commit rolls back, including when
    /// the calling future is cancelled.
    async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }

    async fn commit(tx: Transaction<'static, Sqlite>) -> Result<(), StorageError> {
        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl KeyVaultStore for SqliteKeyVault {
    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexDefinition>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT definition FROM vault_indexes WHERE namespace = ? ORDER BY name",
        )
        .bind(ns.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.into_iter()
            .map(|(definition,)| serde_json::from_str(&definition).map_err(StorageError::from))
            .collect()
    }

    async fn create_index(
        &self,
        ns: &Namespace,
        index: &IndexDefinition,
    ) -> Result<(), StorageError> {
        if index.field != KEY_ALT_NAMES_FIELD {
            return Err(StorageError::InvalidInput(format!(
                "only {KEY_ALT_NAMES_FIELD} indexes are supported, got {}",
                index.field
            )));
        }

        let mut tx = self.begin_immediate().await?;
        Self::create_index_in(&mut tx, ns, index).await?;
        Self::commit(tx).await?;

        debug!(namespace = %ns, index = %index.name, "Index ensured");
        Ok(())
    }

    async fn find_by_alt_name(
        &self,
        ns: &Namespace,
        alt_name: &str,
    ) -> Result<Option<KeyDocument>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT d.document
            FROM key_alt_names a
            JOIN key_documents d ON d.namespace = a.namespace AND d.id = a.key_id
            WHERE a.namespace = ? AND a.alt_name = ?
            ORDER BY d.created_at
            LIMIT 1
            "#,
        )
        .bind(ns.to_string())
        .bind(alt_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(|(document,)| serde_json::from_str(&document).map_err(StorageError::from))
            .transpose()
    }

    async fn find_by_id(
        &self,
        ns: &Namespace,
        id: &KeyId,
    ) -> Result<Option<KeyDocument>, StorageError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT document FROM key_documents WHERE namespace = ? AND id = ?")
                .bind(ns.to_string())
                .bind(id.as_bytes().to_vec())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(|(document,)| serde_json::from_str(&document).map_err(StorageError::from))
            .transpose()
    }

    async fn insert(&self, ns: &Namespace, doc: &KeyDocument) -> Result<(), StorageError> {
        let mut tx = self.begin_immediate().await?;
        Self::insert_in(&mut tx, ns, doc).await?;
        Self::commit(tx).await
    }
}

fn unique_violation_or(e: sqlx::Error, namespace: &str, key: String) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey {
            namespace: namespace.to_string(),
            key,
        },
        _ => StorageError::QueryFailed(e.to_string()),
    }
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
